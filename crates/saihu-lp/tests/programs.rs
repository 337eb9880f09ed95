//! Program-level tests of the LP constructors.
//!
//! The text emission is checked unconditionally; the numeric assertions run
//! only when a working `lp_solve` binary is installed, since the solver is
//! an external collaborator.

use saihu_lp::{
    ConstraintFamily, FifoLp, LpFlow, LpNetwork, LpServer, LpSolver, RateLatency, SfaLp, TfaLp,
    TokenBucket, TreeLp,
};

fn tb(sigma: f64, rho: f64) -> TokenBucket {
    TokenBucket::new(sigma, rho)
}

fn rl(rate: f64, latency: f64) -> RateLatency {
    RateLatency::new(rate, latency)
}

/// Two servers RL(4, 1) in tandem with a capacity-4 shaper; flows
/// f0:[s0,s1], f1:[s0], f2:[s1], each 1 + 1t.
fn tandem(shaper: bool) -> LpNetwork {
    let shaping = if shaper { vec![tb(0.0, 4.0)] } else { Vec::new() };
    let servers = vec![
        LpServer::new(vec![rl(4.0, 1.0)], shaping.clone()),
        LpServer::new(vec![rl(4.0, 1.0)], shaping),
    ];
    let flows = vec![
        LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 1]),
        LpFlow::new(vec![tb(1.0, 1.0)], vec![0]),
        LpFlow::new(vec![tb(1.0, 1.0)], vec![1]),
    ];
    LpNetwork::new(servers, flows, Vec::new())
}

fn solver() -> Option<LpSolver> {
    LpSolver::locate(None).ok()
}

#[test]
fn tfa_program_emits_every_family_of_rows() {
    let net = tandem(true);
    let program = TfaLp::new(&net).program();
    for needle in [
        "max:+ d0 + d1 ;",
        "f0s0u0 <= x0s0 + 0 + 1 u0;",
        "b1t1 >= 4 t1 - 4;",
        "d1 = t1 - u1;",
        "x0s0 = 1;",
        "x0s1 <= x0s0 + 0 + 1 d0;",
    ] {
        assert!(program.contains(needle), "missing row: {needle}");
    }
}

#[test]
fn tfa_delays_on_the_tandem() {
    let Some(solver) = solver() else {
        eprintln!("lp_solve not installed, skipping numeric assertions");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let net = tandem(false);
    let delays = TfaLp::new(&net)
        .without_shaping()
        .delay_servers(&solver, dir.path())
        .unwrap();
    // s0: 1 + (1 + 1)/4; s1 with the propagated burst 1 + 1 * d0
    assert!((delays[0] - 1.5).abs() < 1e-6);
    assert!((delays[1] - 1.875).abs() < 1e-6);

    let e2e = TfaLp::new(&net)
        .without_shaping()
        .delay(0, &solver, dir.path())
        .unwrap();
    assert!((e2e - 3.375).abs() < 1e-6);
}

#[test]
fn tfa_pp_is_strictly_tighter_downstream() {
    let Some(solver) = solver() else {
        eprintln!("lp_solve not installed, skipping numeric assertions");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let net = tandem(true);
    let plain = TfaLp::new(&net)
        .without_shaping()
        .delay_servers(&solver, dir.path())
        .unwrap();
    let shaped = TfaLp::new(&net).delay_servers(&solver, dir.path()).unwrap();
    // shaping cannot help the entrance server but strictly tightens the
    // second hop where the link caps the propagated burst
    assert!((shaped[0] - plain[0]).abs() < 1e-6);
    assert!(shaped[1] < plain[1] - 1e-9);
}

#[test]
fn sfa_delays_are_finite_under_low_load() {
    let Some(solver) = solver() else {
        eprintln!("lp_solve not installed, skipping numeric assertions");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let net = tandem(false);
    let delays = SfaLp::new(&net).all_delays(&solver, dir.path()).unwrap();
    assert_eq!(delays.len(), 3);
    for delay in delays {
        assert!(delay.is_finite());
        assert!(delay > 0.0);
    }
}

#[test]
fn tree_delay_bounds_the_flow_of_interest() {
    let Some(solver) = solver() else {
        eprintln!("lp_solve not installed, skipping numeric assertions");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let servers = vec![
        LpServer::new(vec![rl(4.0, 1.0)], vec![]),
        LpServer::new(vec![rl(4.0, 1.0)], vec![]),
    ];
    let flows = vec![
        LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 1]),
        LpFlow::new(vec![tb(1.0, 1.0)], vec![1]),
    ];
    let net = LpNetwork::new(servers, flows, Vec::new());
    let tree = TreeLp::new(&net, 0, ConstraintFamily::Polynomial, None, None).unwrap();
    let delay = tree.delay(&solver, dir.path()).unwrap();
    assert!(delay.is_finite());
    // never looser than the TFA sum on the same network
    let tfa = TfaLp::new(&net)
        .without_shaping()
        .delay(0, &solver, dir.path())
        .unwrap();
    assert!(delay <= tfa + 1e-6);
}

#[test]
fn fifo_lp_resolves_cut_bursts() {
    let Some(solver) = solver() else {
        eprintln!("lp_solve not installed, skipping numeric assertions");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    // diamond: 0 -> {1, 2} -> 3; the forest cuts one branch
    let servers = (0..4)
        .map(|_| LpServer::new(vec![rl(8.0, 1.0)], vec![]))
        .collect();
    let flows = vec![
        LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 1, 3]),
        LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 2, 3]),
    ];
    let net = LpNetwork::new(servers, flows, Vec::new());
    let fifo = FifoLp::new(net, ConstraintFamily::Polynomial);
    let delays = fifo.all_delays(&solver, dir.path()).unwrap();
    assert_eq!(delays.len(), 2);
    for delay in delays {
        assert!(delay.is_finite());
        assert!(delay > 0.0);
    }
}
