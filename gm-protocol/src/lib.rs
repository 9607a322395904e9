use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Longest accepted chip or attribute name
const MAX_NAME_LENGTH: usize = 32;

/// Longest accepted attribute write payload
pub const MAX_WRITE_LENGTH: usize = 128;

/// Sentinel the core uses for "no value available"
pub const SENTINEL: i64 = -1;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Bound device and profile, if any
    Status,
    ListChips,
    ListAttributes { chip: String },
    ReadAttribute { chip: String, attr: String },
    /// Store a value into a writable attribute (the snapshot push path)
    WriteAttribute { chip: String, attr: String, value: String },
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::Status | Request::ListChips => Ok(()),
            Request::ListAttributes { chip } => validate_name(chip),
            Request::ReadAttribute { chip, attr } => {
                validate_name(chip)?;
                validate_name(attr)
            }
            Request::WriteAttribute { chip, attr, value } => {
                validate_name(chip)?;
                validate_name(attr)?;
                validate_write_value(value)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Status => "Status",
            Request::ListChips => "ListChips",
            Request::ListAttributes { .. } => "ListAttributes",
            Request::ReadAttribute { .. } => "ReadAttribute",
            Request::WriteAttribute { .. } => "WriteAttribute",
        }
    }

    /// Whether the request changes daemon state
    pub fn is_write(&self) -> bool {
        matches!(self, Request::WriteAttribute { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { kind: ErrorClass, message: String },
}

/// Wire form of the core's error classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NotFound,
    Unsupported,
    InvalidArgument,
    ResourceError,
    PermissionDenied,
    Other,
}

/// Response data - each request fills exactly one field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chips: Option<Vec<ChipInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeReading>>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn device_status(s: DeviceStatus) -> Self { Self { status: Some(s), ..Self::default() } }
    pub fn chip_list(c: Vec<ChipInfo>) -> Self { Self { chips: Some(c), ..Self::default() } }
    pub fn readings(a: Vec<AttributeReading>) -> Self { Self { attributes: Some(a), ..Self::default() } }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub loaded: bool,
    pub pci_address: Option<String>,
    pub profile: Option<String>,
    pub hwmon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChipInfo {
    /// hwmonN identifier assigned by the registry
    pub id: String,
    pub name: String,
    /// Parent device, e.g. the PCI address
    pub parent: String,
}

/// One attribute as listed by `ListAttributes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeReading {
    pub name: String,
    pub mode: u16,
    /// Current value for readable attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Read failure, e.g. "unsupported" before the first push
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(kind: ErrorClass, msg: impl Into<String>) -> Self {
        Response::Error { kind, message: msg.into() }
    }
}

/// Snapshot line written to the push attribute
///
/// The helper reads core temperature in °C, board power in mW and fan
/// speed in percent from the vendor library and converts them here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPayload {
    pub core_temp_milli_c: i64,
    pub power_milli_w: i64,
    pub fan: i64,
}

impl PushPayload {
    pub fn new(core_temp_milli_c: i64, power_milli_w: i64, fan: i64) -> Self {
        Self { core_temp_milli_c, power_milli_w, fan }
    }

    /// Convert vendor-library units; a missing fan reading becomes the sentinel
    pub fn from_vendor(temp_c: u32, power_mw: u32, fan_percent: Option<u32>) -> Self {
        Self {
            core_temp_milli_c: i64::from(temp_c) * 1000,
            power_milli_w: i64::from(power_mw),
            fan: fan_percent.map(i64::from).unwrap_or(SENTINEL),
        }
    }
}

impl fmt::Display for PushPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.core_temp_milli_c, self.power_milli_w, self.fan)
    }
}

/// Chip and attribute names follow the hwmon naming rules
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!("Name too long: {} > {} chars", name.len(), MAX_NAME_LENGTH));
    }
    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_' {
            return Err(format!("Name contains invalid character: {:?}", c));
        }
    }
    Ok(())
}

pub fn validate_write_value(value: &str) -> Result<(), String> {
    if value.len() > MAX_WRITE_LENGTH {
        return Err(format!("Value too long: {} > {} bytes", value.len(), MAX_WRITE_LENGTH));
    }
    if value.chars().any(|c| c.is_control() && !c.is_ascii_whitespace()) {
        return Err("Value contains control characters".into());
    }
    Ok(())
}
