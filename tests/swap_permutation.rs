use rand::rngs::StdRng;
use rand::SeedableRng;
use titan_qstate::core::titan::digits::MixedRadix;
use titan_qstate::{gates, QState, Qbit, Qbits};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Subsystems of dimension 2, 3 and 2 in a generic entangled state.
fn entangled_232(seed: u64) -> (Vec<Qbit>, Qbits) {
    let mut rng = StdRng::seed_from_u64(seed);
    let qs: Vec<Qbit> = [2, 3, 2].iter().map(|&d| Qbit::random_with(d, &mut rng).unwrap()).collect();
    let all = Qbits::new(qs.clone()).unwrap();
    gates::random(12, &mut rng).apply_to(&all).unwrap();
    (qs, all)
}

#[test]
fn swap_permutes_mixed_radix_digits() {
    init_tracing();
    let (qs, _all) = entangled_232(7);
    let group = qs[0].group().unwrap();
    let before = group.state().unwrap();

    group.swap(0, 2).unwrap();
    let after = group.state().unwrap();
    let dims = [2, 3, 2];
    for idx in 0..12 {
        let mut digits = MixedRadix::from_value(&dims, idx).unwrap().digits().to_vec();
        digits.swap(0, 2);
        let source = digits.iter().zip(&dims).fold(0, |acc, (&d, &b)| acc * b + d);
        assert_eq!(after[idx], before[source], "index {idx}");
    }
    assert_eq!(qs[0].position(), Some(2));
    assert_eq!(qs[2].position(), Some(0));
}

#[test]
fn swap_twice_restores_vector_and_order() {
    init_tracing();
    let (qs, _all) = entangled_232(9);
    let group = qs[0].group().unwrap();
    let before = group.state().unwrap();
    for (i, j) in [(0, 2), (0, 1), (1, 2)] {
        group.swap(i, j).unwrap();
        group.swap(i, j).unwrap();
        assert_eq!(group.state().unwrap(), before);
        let order: Vec<usize> = qs.iter().map(|q| q.position().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}

#[test]
fn composite_view_is_stable_under_reordering() {
    let (qs, all) = entangled_232(13);
    let before = all.state().unwrap();
    let group = qs[1].group().unwrap();
    group.swap(0, 1).unwrap();
    group.swap(1, 2).unwrap();
    assert_eq!(group.dims(), vec![3, 2, 2]);
    // the composite reorders the group back to its own member order
    assert_eq!(all.state().unwrap(), before);
    assert_eq!(group.dims(), vec![2, 3, 2]);
}
