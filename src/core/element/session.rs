/*!
Secure-element session lifecycle.

A session owns the driver of one physical element. It is opened and closed
explicitly, and every open receives a fresh epoch number. Opening also loads
the key store; when that fails the channel stays open and the load is
retried by the next key or object command. Key handles record
the epoch they were resolved in, so a handle from a closed (or closed and
reopened) session is rejected with `SessionClosed`.

All commands go through one mutex. Holding it for exactly one command keeps
concurrent connections queued on the element without blocking them across
unrelated network waits.
*/

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{DeviceParams, ElementDriver};
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Closed,
    Open { epoch: u64, store_loaded: bool },
}

struct SessionSlot {
    driver: Box<dyn ElementDriver>,
    state: SlotState,
    last_epoch: u64,
}

pub(crate) struct SessionShared {
    params: DeviceParams,
    slot: Mutex<SessionSlot>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        // A panic inside a driver call leaves the slot consistent: state is
        // only written after the driver returns.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let SlotState::Open { .. } = slot.state {
            slot.driver.close();
            slot.state = SlotState::Closed;
            log::debug!("Secure element session {} released on drop", self.params);
        }
    }
}

/// Session with one secure element
///
/// Cloning yields another reference to the same session.
#[derive(Clone)]
pub struct SecureElementSession {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SecureElementSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureElementSession")
            .field("params", &self.shared.params)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SecureElementSession {
    /// Create a closed session over a driver
    pub fn new<D: ElementDriver + 'static>(driver: D, params: DeviceParams) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                params,
                slot: Mutex::new(SessionSlot {
                    driver: Box::new(driver),
                    state: SlotState::Closed,
                    last_epoch: 0,
                }),
            }),
        }
    }

    /// Create a session and open it
    pub fn connect<D: ElementDriver + 'static>(driver: D, params: DeviceParams) -> Result<Self> {
        let session = Self::new(driver, params);
        session.open()?;
        Ok(session)
    }

    /// Open the channel and initialize the key store.
    ///
    /// Fails with `AlreadyOpen` when the session is open. A failed open
    /// leaves the driver closed.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.shared.lock();
        if let SlotState::Open { .. } = slot.state {
            return Err(Error::AlreadyOpen);
        }

        log::info!("Opening secure element session on {}", self.shared.params);
        if let Err(e) = slot.driver.open(&self.shared.params) {
            log::error!("Failed to open secure element session: {}", e);
            slot.driver.close();
            return Err(e);
        }

        let store_loaded = match slot.driver.load_key_store() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Key store not loaded at open: {}", e);
                false
            }
        };

        slot.last_epoch += 1;
        slot.state = SlotState::Open {
            epoch: slot.last_epoch,
            store_loaded,
        };
        log::info!("Secure element session open (epoch {})", slot.last_epoch);
        Ok(())
    }

    /// Close the channel. Further calls are no-ops.
    pub fn close(&self) {
        let mut slot = self.shared.lock();
        if let SlotState::Open { epoch, .. } = slot.state {
            slot.driver.close();
            slot.state = SlotState::Closed;
            log::info!("Secure element session closed (epoch {})", epoch);
        }
    }

    /// Whether the session is open
    pub fn is_open(&self) -> bool {
        matches!(self.shared.lock().state, SlotState::Open { .. })
    }

    /// Connection parameters
    pub fn params(&self) -> &DeviceParams {
        &self.shared.params
    }

    /// Current epoch, `None` when closed
    pub fn epoch(&self) -> Option<u64> {
        match self.shared.lock().state {
            SlotState::Open { epoch, .. } => Some(epoch),
            SlotState::Closed => None,
        }
    }

    /// Run one key-store command against the open session, whatever its
    /// epoch.
    ///
    /// The closure receives the driver and the current epoch. The session
    /// lock is held for the duration of the closure, so a sequence of
    /// commands issued inside it is atomic within this process. A store that
    /// failed to load is loaded again first.
    pub(crate) fn transact_store<T>(
        &self,
        f: impl FnOnce(&mut dyn ElementDriver, u64) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.shared.lock();
        let state = slot.state;
        let epoch = match state {
            SlotState::Open { epoch, store_loaded: true } => epoch,
            SlotState::Open { epoch, store_loaded: false } => {
                slot.driver.load_key_store().map_err(|e| match e {
                    e @ Error::StoreUnavailable(_) => e,
                    other => Error::StoreUnavailable(other.to_string()),
                })?;
                slot.state = SlotState::Open {
                    epoch,
                    store_loaded: true,
                };
                log::info!("Key store loaded (epoch {})", epoch);
                epoch
            }
            SlotState::Closed => return Err(Error::SessionClosed),
        };
        f(slot.driver.as_mut(), epoch)
    }

    /// Whether the key store is loaded in the open session
    pub fn is_store_loaded(&self) -> bool {
        matches!(self.shared.lock().state, SlotState::Open { store_loaded: true, .. })
    }

    /// Run one command on behalf of a handle bound to `epoch`
    pub(crate) fn transact_in<T>(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut dyn ElementDriver) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.shared.lock();
        match slot.state {
            SlotState::Open { epoch: current, .. } if current == epoch => f(slot.driver.as_mut()),
            _ => Err(Error::SessionClosed),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<SessionShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }
}
