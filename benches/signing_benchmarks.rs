use criterion::{black_box, criterion_group, criterion_main, Criterion};
use se_tls_bridge::{
    BoundSigner, DeviceParams, DigestAlgorithm, ElementSigner, KeyHandle, KeySpec, ObjectId,
    SecureElementSession, SigningProvider, SimulatedElement, SoftwareSigner,
};
use std::sync::Arc;

fn element_key() -> (SecureElementSession, KeyHandle) {
    let session = SecureElementSession::connect(SimulatedElement::new(), DeviceParams::default()).unwrap();
    let (key, _) = KeyHandle::resolve_or_create(&session, ObjectId(0xF000_0001), &KeySpec::default()).unwrap();
    (session, key)
}

fn benchmark_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing");
    let digest = DigestAlgorithm::Sha256.digest(b"benchmark transcript");

    let (_session, key) = element_key();
    let element = ElementSigner::new();
    group.bench_function("element_sign_digest", |b| {
        b.iter(|| black_box(element.sign(&key, &digest, DigestAlgorithm::Sha256).unwrap()));
    });

    let software = SoftwareSigner::generate(ObjectId(0x10));
    let handle = software.handle();
    group.bench_function("software_sign_digest", |b| {
        b.iter(|| black_box(software.sign(&handle, &digest, DigestAlgorithm::Sha256).unwrap()));
    });

    let bound = BoundSigner::new(Arc::new(ElementSigner::new()), key.clone());
    group.bench_function("bound_sign_message", |b| {
        b.iter(|| black_box(bound.sign_message(b"benchmark transcript").unwrap()));
    });

    group.finish();
}

fn benchmark_provisioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("provisioning");

    let (session, _) = element_key();
    group.bench_function("resolve_existing", |b| {
        b.iter(|| {
            black_box(KeyHandle::resolve_or_create(&session, ObjectId(0xF000_0001), &KeySpec::default()).unwrap())
        });
    });

    group.bench_function("generate_fresh", |b| {
        b.iter_with_setup(
            || SecureElementSession::connect(SimulatedElement::new(), DeviceParams::default()).unwrap(),
            |session| {
                black_box(KeyHandle::resolve_or_create(&session, ObjectId(0xF000_0001), &KeySpec::default()).unwrap());
            },
        );
    });

    group.finish();
}

criterion_group!(benches, benchmark_signing, benchmark_provisioning);
criterion_main!(benches);
