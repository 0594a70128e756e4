//! Identity messages used by protocol detection.

use super::Reader;
use crate::{
    Result,
    negotiator::{ApiVersion, FirmwareVariant, Version},
};

/// Decodes an `API_VERSION` payload: protocol version, API major, API minor.
pub fn decode_api_version(payload: &[u8]) -> Result<ApiVersion> {
    let mut rd = Reader::new(payload);
    let _protocol = rd.u8()?;

    Ok(ApiVersion::new(rd.u8()?, rd.u8()?))
}

/// Decodes an `FC_VARIANT` payload (four ASCII characters).
pub fn decode_variant(payload: &[u8]) -> Result<FirmwareVariant> {
    let code = Reader::new(payload).take(4)?;

    Ok(FirmwareVariant::from_code(&String::from_utf8_lossy(code)))
}

/// Decodes an `FC_VERSION` payload.
pub fn decode_fc_version(payload: &[u8]) -> Result<Version> {
    let mut rd = Reader::new(payload);

    Ok(Version::new(rd.u8()?, rd.u8()?, rd.u8()?))
}

/// Decodes the board identifier from a `BOARD_INFO` payload.
///
/// The remaining fields (hardware revision, target name, ...) vary between
/// firmware versions and are not needed.
pub fn decode_board_id(payload: &[u8]) -> Result<String> {
    let id = Reader::new(payload).take(4)?;

    Ok(String::from_utf8_lossy(id).into_owned())
}

/// Decodes a `NAME` payload. An empty payload means no craft name is set.
#[must_use]
pub fn decode_name(payload: &[u8]) -> String {
    Reader::new(payload).rest_str()
}
