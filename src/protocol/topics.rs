//! Topic layout and bin code validation
//!
//! Sensor frames are published to `waste/bins/{bin_code}/sensors`. The bin
//! code becomes a single topic level, so it may not contain level separators
//! or wildcard characters.

use thiserror::Error;

pub const TOPIC_ROOT: &str = "waste/bins";
pub const SENSOR_SUFFIX: &str = "sensors";

pub fn sensor_topic(bin_code: &str) -> String {
    format!("{TOPIC_ROOT}/{bin_code}/{SENSOR_SUFFIX}")
}

pub fn validate_bin_code(bin_code: &str) -> Result<(), ValidationError> {
    if bin_code.is_empty() {
        return Err(ValidationError::EmptyBinCode);
    }

    for ch in bin_code.chars() {
        if matches!(ch, '/' | '+' | '#' | '\0') || ch.is_whitespace() {
            return Err(ValidationError::InvalidBinCodeChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Bin code cannot be empty")]
    EmptyBinCode,
    #[error("Bin code contains invalid character: '{0}'")]
    InvalidBinCodeChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sensor_topic() {
        assert_eq!(sensor_topic("BIN001"), "waste/bins/BIN001/sensors");
    }

    #[test]
    fn test_validate_bin_code() {
        assert!(validate_bin_code("BIN001").is_ok());
        assert!(validate_bin_code("bin-7_a").is_ok());
        assert_eq!(validate_bin_code(""), Err(ValidationError::EmptyBinCode));
        assert_eq!(
            validate_bin_code("BIN/1"),
            Err(ValidationError::InvalidBinCodeChar('/'))
        );
        assert_eq!(
            validate_bin_code("BIN#"),
            Err(ValidationError::InvalidBinCodeChar('#'))
        );
        assert_eq!(
            validate_bin_code("BIN 1"),
            Err(ValidationError::InvalidBinCodeChar(' '))
        );
    }

    proptest! {
        #[test]
        fn valid_codes_yield_four_level_topics(code in "[A-Za-z0-9_-]{1,16}") {
            prop_assert!(validate_bin_code(&code).is_ok());
            let topic = sensor_topic(&code);
            let levels: Vec<&str> = topic.split('/').collect();
            prop_assert_eq!(levels.len(), 4);
            prop_assert_eq!(levels[2], code.as_str());
        }
    }
}
