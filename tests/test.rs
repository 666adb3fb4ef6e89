//! End-to-end tests driving every solver through the text-format loader.
//! The small networks below are written out in the same line-oriented format
//! the loader consumes in production; weights are spelled as `ln` expressions
//! so the expected optima stay readable.

use quickcheck::quickcheck;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rspn::repr::assignment::{Indicator, Query};
use rspn::repr::spn::Spn;
use rspn::repr::var_label::VarLabel;
use rspn::solver::approx;
use rspn::solver::exact;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const NEG_INF: f64 = f64::NEG_INFINITY;

/// One variable, `P(X0 = 1) = 0.7`.
fn single_var() -> Spn {
    Spn::from_string(&format!(
        "(2)\nv 0 0\nv 0 1\n+ 1 {} 0 {}\nEOF\n",
        0.7f64.ln(),
        0.3f64.ln()
    ))
}

/// Two independent mixtures joined by a product: `P(0, 0) = 0.6 * 0.8`.
fn independent_pair() -> Spn {
    Spn::from_string(&format!(
        "(2 2)\nv 0 0\nv 0 1\n+ 0 {} 1 {}\nv 1 0\nv 1 1\n+ 3 {} 4 {}\n* 2 5\nEOF\n",
        0.6f64.ln(),
        0.4f64.ln(),
        0.8f64.ln(),
        0.2f64.ln()
    ))
}

/// Three variables with every `(X1, X2)` leaf shared between the two `X0`
/// branches, so the derivative pass sees genuine DAG sharing.
fn shared_leaves() -> Spn {
    Spn::from_string(&format!(
        concat!(
            "(2 2 2)\n",
            "v 0 0\nv 0 1\n",
            "v 1 0\nv 1 1\n",
            "v 2 0\nv 2 1\n",
            "+ 2 {} 3 {}\n",
            "+ 4 {} 5 {}\n",
            "+ 2 {} 3 {}\n",
            "+ 4 {} 5 {}\n",
            "* 0 6 7\n",
            "* 1 8 9\n",
            "+ 10 {} 11 {}\n",
            "EOF\n"
        ),
        0.9f64.ln(),
        0.1f64.ln(),
        0.2f64.ln(),
        0.8f64.ln(),
        0.3f64.ln(),
        0.7f64.ln(),
        0.6f64.ln(),
        0.4f64.ln(),
        0.5f64.ln(),
        0.5f64.ln()
    ))
}

/// Eight independent mixtures under one product root: wide enough that the
/// staging solver actually restages (it needs five fixed variables with at
/// least two still free).
fn eight_var_chain() -> Spn {
    let mut text = String::from("(2 2 2 2 2 2 2 2)\n");
    for v in 0..8 {
        let lo = 0.30 + 0.05 * v as f64;
        text.push_str(&format!("v {} 0\nv {} 1\n", v, v));
        text.push_str(&format!(
            "+ {} {} {} {}\n",
            3 * v,
            lo.ln(),
            3 * v + 1,
            (1.0 - lo).ln()
        ));
    }
    text.push('*');
    for v in 0..8 {
        text.push_str(&format!(" {}", 3 * v + 2));
    }
    text.push_str("\nEOF\n");
    Spn::from_string(&text)
}

fn all_assignments(num_vars: usize) -> Vec<Vec<usize>> {
    (0..1usize << num_vars)
        .map(|bits| (0..num_vars).map(|v| (bits >> v) & 1).collect())
        .collect()
}

fn brute_force(spn: &Spn) -> f64 {
    all_assignments(spn.num_vars())
        .iter()
        .map(|x| spn.eval_total(x))
        .fold(NEG_INF, f64::max)
}

fn exact_all(spn: &Spn, baseline: f64) -> [f64; 4] {
    [
        exact::marginal_checking(spn, baseline, HOUR),
        exact::forward_checking(spn, baseline, HOUR),
        exact::forward_checking_ordering(spn, baseline, HOUR),
        exact::forward_checking_staging(spn, baseline, HOUR),
    ]
}

#[test]
fn test_every_solver_on_the_single_variable_network() {
    let spn = single_var();
    let expect = 0.7f64.ln();

    assert_eq!(approx::max_product(&spn), vec![1]);
    assert_eq!(approx::naive_greedy(&spn), vec![1]);

    let (x, p) = approx::amap(&spn, HOUR).unwrap();
    assert_eq!(x.as_slice(), &[Some(1)]);
    assert!((p - expect).abs() < 1e-12);

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let bs = approx::beam_search(&spn, 2, HOUR, &mut rng);
    assert_eq!(bs.x, vec![1]);
    assert!((bs.p - expect).abs() < 1e-12);

    let kbt = approx::k_best(&spn, 2, HOUR).unwrap();
    assert_eq!(kbt.x, vec![1]);
    assert!((kbt.p - expect).abs() < 1e-12);

    for p in exact_all(&spn, NEG_INF) {
        assert!((p - expect).abs() < 1e-12);
    }
}

#[test]
fn test_every_solver_on_the_independent_pair() {
    let spn = independent_pair();
    let expect = 0.6f64.ln() + 0.8f64.ln();

    assert_eq!(approx::max_product(&spn), vec![0, 0]);
    assert_eq!(approx::naive_greedy(&spn), vec![0, 0]);
    let (_, p) = approx::amap(&spn, HOUR).unwrap();
    assert!((p - expect).abs() < 1e-12);
    let kbt = approx::k_best(&spn, 3, HOUR).unwrap();
    assert!((kbt.p - expect).abs() < 1e-12);
    for p in exact_all(&spn, NEG_INF) {
        assert!((p - expect).abs() < 1e-12);
    }
}

#[test]
fn test_exact_solvers_agree_on_shared_leaves() {
    let spn = shared_leaves();
    let expect = brute_force(&spn);
    for p in exact_all(&spn, NEG_INF) {
        assert!((p - expect).abs() < 1e-9);
    }
}

#[test]
fn test_derivative_bounds_on_shared_leaves() {
    let spn = shared_leaves();
    let m = spn.marginals(&Indicator::all_ones(spn.schema()));
    for x in all_assignments(3) {
        let p = spn.eval_total(&x);
        for v in 0..3 {
            assert!(p <= m.get(VarLabel::new_usize(v), x[v]) + 1e-9);
        }
    }
}

#[test]
fn test_map_to_max_query_matches_clamped_brute_force() {
    let spn = shared_leaves();
    let cond = spn.condition(&Query::from_string("?1?"));
    assert_eq!(cond.num_vars(), 2);
    let expect = all_assignments(2)
        .iter()
        .map(|x| spn.eval_total(&[x[0], 1, x[1]]))
        .fold(NEG_INF, f64::max);
    for p in exact_all(&cond, NEG_INF) {
        assert!((p - expect).abs() < 1e-9);
    }
}

#[test]
fn test_all_free_specialisation_is_the_identity() {
    let spn = shared_leaves();
    let cond = spn.condition(&Query::from_string("???"));
    for x in all_assignments(3) {
        assert_eq!(cond.eval_total(&x), spn.eval_total(&x));
    }
}

#[test]
fn test_zero_timeout_returns_the_baseline() {
    let spn = shared_leaves();
    // -4.25 is below the optimum, yet with no time to search it must come
    // back untouched
    for p in [
        exact::marginal_checking(&spn, -4.25, Duration::ZERO),
        exact::forward_checking(&spn, -4.25, Duration::ZERO),
        exact::forward_checking_ordering(&spn, -4.25, Duration::ZERO),
        exact::forward_checking_staging(&spn, -4.25, Duration::ZERO),
    ] {
        assert_eq!(p, -4.25);
    }
    assert!(approx::amap(&spn, Duration::ZERO).is_none());
    assert!(approx::k_best(&spn, 4, Duration::ZERO).is_none());
}

#[test]
fn test_beam_search_reaches_the_optimum_for_every_seed() {
    // on the independent pair every improving flip leads to the unique
    // optimum, so any beam and any seed must land on it; in particular a
    // wider beam can never do worse than a narrow one
    let spn = independent_pair();
    let expect = 0.6f64.ln() + 0.8f64.ln();
    for seed in 0..6 {
        for beam in [1, 2, 6] {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let best = approx::beam_search(&spn, beam, HOUR, &mut rng);
            assert!(
                (best.p - expect).abs() < 1e-12,
                "seed {} beam {} missed the optimum",
                seed,
                beam
            );
        }
    }
}

#[test]
fn test_staging_solver_on_a_network_wide_enough_to_restage() {
    let spn = eight_var_chain();
    let expect = brute_force(&spn);
    for p in exact_all(&spn, NEG_INF) {
        assert!((p - expect).abs() < 1e-9);
    }
}

quickcheck! {
    fn prop_approximate_never_beats_exact(spn: Spn) -> bool {
        let exact_p = exact::forward_checking_ordering(&spn, NEG_INF, HOUR);
        let slack = 1e-9;

        let bt = spn.eval_total(&approx::max_product(&spn));
        let ng = spn.eval_total(&approx::naive_greedy(&spn));
        let (_, amap_p) = approx::amap(&spn, HOUR).unwrap();
        let kbt = approx::k_best(&spn, 3, HOUR).unwrap().p;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let bs = approx::beam_search(&spn, 3, HOUR, &mut rng).p;

        [bt, ng, amap_p, kbt, bs].iter().all(|&p| p <= exact_p + slack)
    }

    fn prop_exact_solvers_agree(spn: Spn) -> bool {
        let ps = exact_all(&spn, NEG_INF);
        ps.iter().all(|p| (p - ps[0]).abs() < 1e-9)
    }

    fn prop_k_best_is_monotone_in_k(spn: Spn) -> bool {
        let p1 = approx::k_best(&spn, 1, HOUR).unwrap().p;
        let p3 = approx::k_best(&spn, 3, HOUR).unwrap().p;
        let p8 = approx::k_best(&spn, 8, HOUR).unwrap().p;
        p1 <= p3 + 1e-12 && p3 <= p8 + 1e-12
    }

    fn prop_exact_matches_brute_force(spn: Spn) -> bool {
        (exact::marginal_checking(&spn, NEG_INF, HOUR) - brute_force(&spn)).abs() < 1e-9
    }
}
