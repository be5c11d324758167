//! Save/load round-trip tests for the engine state file.

mod common;

use common::sphere_invertor;
use prift::{Invertor, PriftError};

#[test]
fn test_solved_state_round_trips_exactly() {
    let mut inv = sphere_invertor();
    inv.set_q_min(Some(0.002));
    inv.set_slit_height(0.01).unwrap();
    let (out, _) = inv.lstsq(10).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sphere.prift");
    inv.to_file(&path).unwrap();

    let restored = Invertor::from_file(&path).unwrap();

    // Configuration and window restore exactly
    assert_eq!(restored.d_max(), inv.d_max());
    assert_eq!(restored.alpha(), inv.alpha());
    assert_eq!(restored.q_min(), Some(0.002));
    assert_eq!(restored.q_max(), None);
    assert_eq!(restored.slit_height(), 0.01);
    assert_eq!(restored.npts(), inv.npts());

    // The stored result restores bit for bit
    assert_eq!(restored.chi2(), inv.chi2());
    let restored_out = restored.result().unwrap().out.clone();
    assert_eq!(restored_out, out);

    // So evaluations agree exactly as well
    for &r in &[0.0, 20.0, 80.0, 140.0, 160.0] {
        assert_eq!(restored.pr(&restored_out, r), inv.pr(&out, r));
    }
    for &q in &[0.005, 0.05, 0.2] {
        assert_eq!(restored.iq(&restored_out, q), inv.iq(&out, q));
    }
}

#[test]
fn test_unsolved_state_round_trips() {
    let inv = sphere_invertor();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unsolved.prift");
    inv.to_file(&path).unwrap();

    let restored = Invertor::from_file(&path).unwrap();
    assert!(restored.result().is_none());
    assert_eq!(restored.chi2(), 0.0);
    assert_eq!(restored.npts(), 101);
    assert_eq!(restored.data().x()[0], inv.data().x()[0]);
    assert_eq!(restored.data().y()[100], inv.data().y()[100]);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let result = Invertor::from_file("/nonexistent/path/state.prift");
    assert!(matches!(result, Err(PriftError::IoError(_))));
}

#[test]
fn test_garbage_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.prift");
    std::fs::write(&path, "this is not a state file\n").unwrap();

    let result = Invertor::from_file(&path);
    assert!(matches!(result, Err(PriftError::ParseError(_))));
}

#[test]
fn test_saved_file_survives_a_second_cycle() {
    let mut inv = sphere_invertor();
    inv.lstsq(6).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.prift");
    let second = dir.path().join("second.prift");

    inv.to_file(&first).unwrap();
    let mid = Invertor::from_file(&first).unwrap();
    mid.to_file(&second).unwrap();

    // Shortest round-trip floats make the files byte-identical
    let bytes_first = std::fs::read(&first).unwrap();
    let bytes_second = std::fs::read(&second).unwrap();
    assert_eq!(bytes_first, bytes_second);
}
