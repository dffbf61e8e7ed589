//! Byte-level persistence for model and scaler state.
//!
//! Layout: 4-byte magic, little-endian `u16` schema version, then the
//! `bincode` payload. The version is checked before the payload is decoded.

use crate::error::{EngineResult, ForecastError};
use crate::scaling::ScalerState;

use super::state::ForecastModelState;

/// Current schema version for both model and scaler payloads.
pub const SCHEMA_VERSION: u16 = 1;

const MODEL_MAGIC: &[u8; 4] = b"CFMS";
const SCALER_MAGIC: &[u8; 4] = b"CFSS";
const HEADER_LEN: usize = 6;

fn encode<T: serde::Serialize>(magic: &[u8; 4], value: &T) -> EngineResult<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(magic);
    bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode<T: serde::de::DeserializeOwned>(magic: &[u8; 4], bytes: &[u8]) -> EngineResult<T> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != magic {
        return Err(ForecastError::Serialization(Box::new(bincode::ErrorKind::Custom(
            format!(
                "missing {} header",
                String::from_utf8_lossy(magic)
            ),
        ))));
    }

    let found = u16::from_le_bytes([bytes[4], bytes[5]]);
    if found != SCHEMA_VERSION {
        return Err(ForecastError::IncompatibleVersion {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    Ok(bincode::deserialize(&bytes[HEADER_LEN..])?)
}

/// Encode a trained model state.
pub fn serialize(state: &ForecastModelState) -> EngineResult<Vec<u8>> {
    encode(MODEL_MAGIC, state)
}

/// Decode a trained model state.
pub fn deserialize(bytes: &[u8]) -> EngineResult<ForecastModelState> {
    let state: ForecastModelState = decode(MODEL_MAGIC, bytes)?;
    state.check_shape()?;
    Ok(state)
}

/// Encode fitted scaler statistics.
pub fn serialize_scaler(state: &ScalerState) -> EngineResult<Vec<u8>> {
    encode(SCALER_MAGIC, state)
}

/// Decode fitted scaler statistics.
pub fn deserialize_scaler(bytes: &[u8]) -> EngineResult<ScalerState> {
    decode(SCALER_MAGIC, bytes)
}
