use std::fs;

use titan_qstate::config::{default_config_path, SimConfig};
use titan_qstate::{gates, real_ket, Basis, QError, QState, Qbit, Qbits, Target};

fn sealed() -> SimConfig {
    SimConfig::default().with_cheat(false)
}

fn sealed_zero() -> Qbit {
    Qbit::builder(real_ket(&[1.0, 0.0])).config(sealed()).build().unwrap()
}

#[test]
fn loads_config_from_file() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("qstate.toml");
    fs::write(&path, "precision = 10\ncheat = false\n").unwrap();
    let cfg = SimConfig::from_toml_file(&path).unwrap();
    assert_eq!(cfg.precision, 10);
    assert!(!cfg.cheat);
    assert!(!cfg.auto_normalize);
    assert_eq!(cfg.display_digits, 5);
    assert!((cfg.tolerance() - 1e-10).abs() < 1e-20);
}

#[test]
fn rejects_bad_config_files() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("bad.toml");
    fs::write(&path, "precision = 40\n").unwrap();
    assert!(SimConfig::from_toml_file(&path).is_err());
    fs::write(&path, "colour = true\n").unwrap();
    assert!(SimConfig::from_toml_file(&path).is_err());
    assert!(SimConfig::from_toml_file(&td.path().join("missing.toml")).is_err());
}

#[test]
fn user_config_path_is_under_home() {
    if let Some(p) = default_config_path() {
        assert!(p.ends_with(".titan/qstate.toml"));
    }
}

#[test]
fn every_introspection_is_refused() {
    let q = sealed_zero();
    let expect_refused = |r: Result<String, QError>| assert!(r.unwrap_err().is_not_allowed());
    assert!(q.state().unwrap_err().is_not_allowed());
    assert!(q.probability(0, None).unwrap_err().is_not_allowed());
    expect_refused(q.print_as(Some(&Basis::hadamard())));
    expect_refused(q.print_probs(None));
    assert_eq!(q.state().unwrap_err().to_string(), "Not Allowed: Cheating is not allowed!");

    let pair = Qbits::new(vec![q.clone(), sealed_zero()]).unwrap();
    pair.apply_at(gates::h(), Target::Start(0)).unwrap();
    gates::cnot().apply_to(&pair).unwrap();
    assert!(pair.state().unwrap_err().is_not_allowed());
    let group = q.group().unwrap();
    assert!(group.reduced_probability_vector(0).unwrap_err().is_not_allowed());
    assert!(group.state().unwrap_err().is_not_allowed());
    assert!(pair.to_string().starts_with("<Qstate @ 0x"));
    assert!(pair.to_string().ends_with("(Qbits)>"));
}

#[test]
fn operations_still_work_without_cheating() {
    let q = sealed_zero();
    gates::x().apply_to(&q).unwrap();
    let outcome = q.measure(None).unwrap();
    assert_eq!(outcome.re, 1.0);
}

#[test]
fn auto_normalize_comes_from_config() {
    let loose = SimConfig::default().with_auto_normalize(true);
    let q = Qbit::builder(real_ket(&[3.0, 4.0])).config(loose).build().unwrap();
    assert!((q.probability(1, None).unwrap() - 0.64).abs() < 1e-12);

    let strict = Qbit::builder(real_ket(&[3.0, 4.0])).config(loose).normalize(false).build();
    assert!(strict.unwrap_err().to_string().starts_with("Initialization Error: Error to initialize Qbit"));
}

#[test]
fn precision_controls_norm_check() {
    let coarse = SimConfig::default().with_precision(3);
    assert!(Qbit::builder(real_ket(&[1.0, 1e-3])).config(coarse).build().is_ok());
    assert!(Qbit::builder(real_ket(&[1.0, 1e-3])).build().is_err());
}
