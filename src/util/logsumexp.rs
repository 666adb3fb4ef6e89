//! Numerically stable arithmetic over log-domain values.
//!
//! Every probability in this crate lives in log space; an impossible event is
//! `f64::NEG_INFINITY`. The max-shifted formulation below never exponentiates
//! anything larger than zero, so finite inputs cannot overflow.

/// Computes `log(exp(a) + exp(b))` without leaving the log domain.
/// Two `-inf` arguments yield `-inf`.
///
/// ```
/// use rspn::util::logsumexp::log_add;
///
/// let v = log_add(0.5f64.ln(), 0.25f64.ln());
/// assert!((v - 0.75f64.ln()).abs() < 1e-12);
/// assert_eq!(log_add(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
/// ```
pub fn log_add(a: f64, b: f64) -> f64 {
    let m = f64::max(a, b);
    if m.is_infinite() {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Computes `log(sum_i exp(xs[i]))`.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    log_sum_exp_by(xs.len(), |i| xs[i])
}

/// Max-shifted log-sum-exp over `f(0), ..., f(n - 1)`. An infinite maximum of
/// either sign is returned directly; the empty sum is `-inf`.
pub fn log_sum_exp_by<F: Fn(usize) -> f64>(n: usize, f: F) -> f64 {
    let mut m = f64::NEG_INFINITY;
    for i in 0..n {
        m = f64::max(m, f(i));
    }
    if m.is_infinite() {
        return m;
    }
    let mut sum = 0.0;
    for i in 0..n {
        sum += (f(i) - m).exp();
    }
    m + sum.ln()
}

#[test]
fn test_log_add_matches_log_sum_exp() {
    let cases = [
        (0.3f64.ln(), 0.7f64.ln()),
        (-700.0, -701.0),
        (700.0, 699.0),
        (0.0, f64::NEG_INFINITY),
    ];
    for (a, b) in cases {
        let diff = (log_add(a, b) - log_sum_exp(&[a, b])).abs();
        assert!(diff < 1e-12, "log_add({}, {}) diverged by {}", a, b, diff);
    }
}

#[test]
fn test_log_sum_exp_infinities() {
    assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    assert_eq!(
        log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
        f64::NEG_INFINITY
    );
    assert_eq!(log_sum_exp(&[1.0, f64::INFINITY]), f64::INFINITY);
    assert_eq!(log_add(f64::NEG_INFINITY, 2.0), 2.0);
}

#[test]
fn test_log_sum_exp_large_magnitudes() {
    // naive exp-then-log would overflow here
    let v = log_sum_exp(&[1000.0, 1000.0]);
    assert!((v - (1000.0 + 2.0f64.ln())).abs() < 1e-9);
}
