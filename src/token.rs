use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;
use thiserror::Error;

const DEVICEID_KEY: &str = "DeviceId";
const HOSTNAME_KEY: &str = "HostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";

const FRAGMENT: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS.add(b'/');

/// Errors building device credentials
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The shared access key is not valid base64
    #[error("shared access key is not valid base64")]
    InvalidKey,
    /// A required component is missing from the connection string
    #[error("connection string is missing {0}")]
    MissingParameter(&'static str),
}

/// Something that can produce a shared access signature for the hub
pub trait TokenSource {
    /// Token valid until `expiry`
    fn get(&self, expiry: &DateTime<Utc>) -> String;
}

/// Signs tokens with the device's shared access key
#[derive(Clone)]
pub struct DeviceKeyTokenSource {
    resource_uri: String,
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for DeviceKeyTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyTokenSource")
            .field("resource_uri", &self.resource_uri)
            .finish()
    }
}

impl DeviceKeyTokenSource {
    /// Create a token source for `device_id` on `hub`
    ///
    /// Fails if `key` is not base64.
    pub fn new(hub: &str, device_id: &str, key: &str) -> Result<Self, TokenError> {
        let key = base64::decode(key).map_err(|_| TokenError::InvalidKey)?;
        let mac = Hmac::<Sha256>::new_varkey(&key).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self {
            resource_uri: format!("{}/devices/{}", hub, device_id),
            mac,
        })
    }

    fn signature(&self, expiry_timestamp: i64) -> String {
        let resource_uri = percent_encoding::utf8_percent_encode(&self.resource_uri, FRAGMENT);
        let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);
        let token = sign(self.mac.clone(), &to_sign);

        format!(
            "SharedAccessSignature sr={}&{}&se={}",
            resource_uri, token, expiry_timestamp
        )
    }
}

impl TokenSource for DeviceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> String {
        let sas = self.signature(expiry.timestamp());
        trace!("Using device key token: {}", sas);
        sas
    }
}

/// Components of a device connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// IoT hub hostname
    pub hostname: String,
    /// Registered device id
    pub device_id: String,
    /// Base64 device key
    pub shared_access_key: String,
}

/// Split `HostName=...;DeviceId=...;SharedAccessKey=...` into its components
///
/// Unknown components are ignored.
pub fn parse_connection_string(connection_string: &str) -> Result<ConnectionString, TokenError> {
    let mut key = None;
    let mut device_id = None;
    let mut hostname = None;

    for part in connection_string.split(';') {
        // Keys may contain '=' padding, so only split on the first one
        let mut kv = part.splitn(2, '=');
        let name = kv.next().unwrap_or_default().trim();
        let value = kv.next().unwrap_or_default();
        match name {
            SHAREDACCESSKEY_KEY => key = Some(value),
            DEVICEID_KEY => device_id = Some(value),
            HOSTNAME_KEY => hostname = Some(value),
            _ => (),
        }
    }

    Ok(ConnectionString {
        hostname: hostname
            .ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?
            .to_string(),
        device_id: device_id
            .ok_or(TokenError::MissingParameter(DEVICEID_KEY))?
            .to_string(),
        shared_access_key: key
            .ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?
            .to_string(),
    })
}

fn sign(mut mac: Hmac<Sha256>, message: &str) -> String {
    mac.update(message.as_bytes());
    let signature = base64::encode(mac.finalize().into_bytes());

    form_urlencoded::Serializer::new(String::new())
        .append_pair("sig", &signature)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_key_signature() {
        let source = DeviceKeyTokenSource::new(
            "myiothub.azure-devices.net",
            "FirstDevice",
            "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=",
        )
        .unwrap();
        assert_eq!(source.signature(1_587_123_309), "SharedAccessSignature sr=myiothub.azure-devices.net%2Fdevices%2FFirstDevice&sig=vn0%2BgyIUKgaBhEU0ypyOhJ0gPK5fSY1TKdvcJ1HxhnQ%3D&se=1587123309".to_string());
    }

    #[test]
    fn invalid_key() {
        assert_eq!(
            DeviceKeyTokenSource::new("hub", "device", "not base64!").unwrap_err(),
            TokenError::InvalidKey
        );
    }

    #[test]
    fn connection_string_components() {
        let parsed = parse_connection_string(
            "HostName=myiothub.azure-devices.net;DeviceId=RaspPi;SharedAccessKey=abc=",
        )
        .unwrap();
        assert_eq!(parsed.hostname, "myiothub.azure-devices.net");
        assert_eq!(parsed.device_id, "RaspPi");
        assert_eq!(parsed.shared_access_key, "abc=");
    }

    #[test]
    fn connection_string_missing_key() {
        assert_eq!(
            parse_connection_string("HostName=hub;DeviceId=RaspPi"),
            Err(TokenError::MissingParameter("SharedAccessKey"))
        );
    }
}
