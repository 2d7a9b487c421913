//! The closed data-type tag set. Values 0..=63 are reserved.

use vigil_model::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    RequestTimeFrames = 128,
    ResponseTimeFrame = 129,
    RequestTslBroadcast = 130,
    ResponseTslApprove = 131,
    RequestClaimBroadcast = 132,
    ResponseClaimApprove = 133,
    RequestDigestBroadcast = 134,
    ResponseDigestApprove = 135,
    RequestBlockSignaturesBroadcast = 136,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            128 => Ok(DataType::RequestTimeFrames),
            129 => Ok(DataType::ResponseTimeFrame),
            130 => Ok(DataType::RequestTslBroadcast),
            131 => Ok(DataType::ResponseTslApprove),
            132 => Ok(DataType::RequestClaimBroadcast),
            133 => Ok(DataType::ResponseClaimApprove),
            134 => Ok(DataType::RequestDigestBroadcast),
            135 => Ok(DataType::ResponseDigestApprove),
            136 => Ok(DataType::RequestBlockSignaturesBroadcast),
            _ => Err(Error::InvalidDataFormat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values() {
        assert_eq!(DataType::RequestTimeFrames.as_u8(), 128);
        assert_eq!(DataType::RequestBlockSignaturesBroadcast.as_u8(), 136);
    }

    #[test]
    fn test_roundtrip() {
        for value in 128u8..=136 {
            assert_eq!(DataType::try_from(value).unwrap().as_u8(), value);
        }
    }

    #[test]
    fn test_reserved_and_unknown_rejected() {
        for value in [0u8, 1, 63, 64, 127, 137, 255] {
            assert!(DataType::try_from(value).is_err());
        }
    }
}
