// verify.rs — CPU reference check of device results.
//
// Exact equality, no epsilon. Host and device both perform a single f32
// addition per element, so the results are bit-identical. A kernel with any
// other rounding behaviour needs a tolerance-based check instead.

use crate::error::{HarnessError, Result};

/// Number of elements that were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    pub checked: usize,
}

pub type VerificationResult = Result<Verified>;

/// Host reference: `a[i] + b[i]` for every index.
pub fn reference_sum(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Check `actual[i] == a[i] + b[i]` for every index, stopping at the first
/// mismatch.
///
/// Slices of different lengths mismatch at the first index past the
/// shorter one.
pub fn verify(a: &[f32], b: &[f32], actual: &[f32]) -> VerificationResult {
    for (index, ((x, y), c)) in a.iter().zip(b).zip(actual).enumerate() {
        let expected = x + y;
        if *c != expected {
            return Err(HarnessError::ResultMismatch { index, expected, actual: *c });
        }
    }

    let n = a.len();
    if b.len() != n || actual.len() != n {
        let index = n.min(b.len()).min(actual.len());
        let expected = match (a.get(index), b.get(index)) {
            (Some(x), Some(y)) => x + y,
            _ => f32::NAN,
        };
        let got = actual.get(index).copied().unwrap_or(f32::NAN);
        return Err(HarnessError::ResultMismatch { index, expected, actual: got });
    }

    Ok(Verified { checked: n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_sum() {
        let a = vec![1.0f32; 16];
        let b = vec![2.0f32; 16];
        let c = vec![3.0f32; 16];
        assert_eq!(verify(&a, &b, &c).unwrap(), Verified { checked: 16 });
    }

    #[test]
    fn fails_fast_at_first_mismatch() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [1.0f32, 1.0, 1.0, 1.0];
        let c = [2.0f32, 9.0, 9.0, 5.0];
        match verify(&a, &b, &c) {
            Err(HarnessError::ResultMismatch { index, expected, actual }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, 3.0);
                assert_eq!(actual, 9.0);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn kernel_ignoring_b_fails_at_zero() {
        let a = [0.25f32, 0.5, 0.75, 1.0];
        let b = [1.0f32; 4];
        match verify(&a, &b, &a) {
            Err(HarnessError::ResultMismatch { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn no_epsilon_tolerance() {
        let a = [0.1f32];
        let b = [0.2f32];
        let off_by_one_ulp = f32::from_bits((0.1f32 + 0.2f32).to_bits() + 1);
        assert!(verify(&a, &b, &[off_by_one_ulp]).is_err());
        assert!(verify(&a, &b, &[0.1f32 + 0.2f32]).is_ok());
    }

    #[test]
    fn length_mismatch_reports_first_missing_index() {
        let a = [1.0f32; 4];
        let b = [1.0f32; 4];
        let c = [2.0f32; 3];
        match verify(&a, &b, &c) {
            Err(HarnessError::ResultMismatch { index, .. }) => assert_eq!(index, 3),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn reference_sum_matches_verify() {
        let a = [1.5f32, -2.0, 1e30];
        let b = [0.25f32, 2.0, 1e30];
        let c = reference_sum(&a, &b);
        assert!(verify(&a, &b, &c).is_ok());
    }
}
