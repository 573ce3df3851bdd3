//! Currency text normalization

use crate::error::ValidationError;

/// Parse free-form currency text such as `KSh 1,850.00` into a positive amount.
///
/// Currency symbols, letters, spaces and thousands separators are dropped
/// before parsing. A `.` is a decimal point only when a digit follows it
/// and it does not end an abbreviation such as `KSh.`. Non-finite and
/// non-positive results are rejected.
pub fn normalize_amount(input: &str) -> Result<f64, ValidationError> {
    let chars: Vec<char> = input.chars().collect();
    let cleaned: String = chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| match c {
            '.' => {
                let before = i.checked_sub(1).map(|j| chars[j]);
                let after = chars.get(i + 1);
                !before.is_some_and(char::is_alphabetic) && after.is_some_and(char::is_ascii_digit)
            }
            '-' => true,
            c => c.is_ascii_digit(),
        })
        .map(|(_, &c)| c)
        .collect();

    let amount: f64 = cleaned
        .parse()
        .map_err(|_| ValidationError::InvalidAmount(input.to_string()))?;

    if !amount.is_finite() || amount <= 0.0 {
        return Err(ValidationError::InvalidAmount(input.to_string()));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_text_normalizes() {
        assert_eq!(normalize_amount("KSh 1,850.00").unwrap(), 1850.0);
        assert_eq!(normalize_amount("1850").unwrap(), 1850.0);
        assert_eq!(normalize_amount(" 12,000 /=").unwrap(), 12000.0);
        assert_eq!(normalize_amount("$0.50").unwrap(), 0.5);
        assert_eq!(normalize_amount(".75").unwrap(), 0.75);
    }

    #[test]
    fn test_abbreviation_dot_is_not_a_decimal_point() {
        assert_eq!(normalize_amount("KSh. 1,850").unwrap(), 1850.0);
        assert_eq!(normalize_amount("Ksh.1,850.00").unwrap(), 1850.0);
        assert_eq!(normalize_amount("Rs. 300.25").unwrap(), 300.25);
    }

    #[test]
    fn test_rejects_non_positive_and_garbage() {
        for bad in ["-5", "abc", "", "0", "0.00", "KSh", "1.2.3", "5-"] {
            assert!(
                matches!(normalize_amount(bad), Err(ValidationError::InvalidAmount(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_overflow() {
        let huge = "9".repeat(400);
        assert!(normalize_amount(&huge).is_err());
    }
}
