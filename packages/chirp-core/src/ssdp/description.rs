//! UPnP root device description documents.
//!
//! Remote descriptions are fetched over HTTP and parsed into a
//! [`DeviceDescription`]. This server's own description is rendered by
//! [`render_root_description`] and served at `/rootDesc.xml`.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::protocol_constants::{
    NS_CONNECTION_MANAGER, NS_CONTENT_DIRECTORY, NS_MEDIA_SERVER, UPNP_DEVICE_XMLNS,
};

/// Errors from fetching or parsing a root device description.
#[derive(Debug, Error)]
pub enum DescriptionError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Device answered with an error status.
    #[error("HTTP {0} fetching {1}")]
    HttpStatus(u16, String),

    /// Document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// A required element is missing.
    #[error("Missing required element: {0}")]
    MissingField(&'static str),
}

pub type DescriptionResult<T> = Result<T, DescriptionError>;

/// Root device fields read from a description document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub udn: String,
    pub presentation_url: Option<String>,
    /// Every `serviceType` in the document, embedded devices included.
    pub service_types: Vec<String>,
}

/// Fetches the description document behind a `LOCATION` URL.
#[async_trait]
pub trait DescriptionFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> DescriptionResult<DeviceDescription>;
}

/// [`DescriptionFetcher`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpDescriptionFetcher {
    client: Client,
}

impl HttpDescriptionFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a fetcher with its own client and request timeout.
    pub fn with_timeout(timeout: Duration) -> DescriptionResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl DescriptionFetcher for HttpDescriptionFetcher {
    async fn fetch(&self, location: &str) -> DescriptionResult<DeviceDescription> {
        let response = self.client.get(location).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DescriptionError::HttpStatus(
                status.as_u16(),
                location.to_string(),
            ));
        }
        let body = response.text().await?;
        parse_root_description(&body)
    }
}

/// Parses a UPnP device description.
///
/// The root `<device>` precedes any `<deviceList>` in the document, so the
/// first occurrence of each field belongs to the root device.
pub fn parse_root_description(xml: &str) -> DescriptionResult<DeviceDescription> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut seen_device = false;
    let mut device_type = None;
    let mut friendly_name = None;
    let mut manufacturer = None;
    let mut model_name = None;
    let mut model_number = None;
    let mut udn = None;
    let mut presentation_url = None;
    let mut service_types = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                let slot = match local_name.as_ref() {
                    b"device" => {
                        seen_device = true;
                        None
                    }
                    b"deviceType" => Some(&mut device_type),
                    b"friendlyName" => Some(&mut friendly_name),
                    b"manufacturer" => Some(&mut manufacturer),
                    b"modelName" => Some(&mut model_name),
                    b"modelNumber" => Some(&mut model_number),
                    b"UDN" => Some(&mut udn),
                    b"presentationURL" => Some(&mut presentation_url),
                    b"serviceType" => {
                        if let Ok(text) = reader.read_text(e.name()) {
                            service_types.push(unescape_text(&text));
                        }
                        None
                    }
                    _ => None,
                };
                if let Some(slot) = slot {
                    let text = reader
                        .read_text(e.name())
                        .map_err(|err| DescriptionError::Parse(err.to_string()))?;
                    if slot.is_none() {
                        *slot = Some(unescape_text(&text));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DescriptionError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !seen_device {
        return Err(DescriptionError::MissingField("device"));
    }
    let udn = udn
        .filter(|u| !u.is_empty())
        .ok_or(DescriptionError::MissingField("UDN"))?;

    Ok(DeviceDescription {
        device_type: device_type.unwrap_or_default(),
        friendly_name: friendly_name.unwrap_or_default(),
        manufacturer,
        model_name,
        model_number,
        udn,
        presentation_url,
        service_types,
    })
}

fn unescape_text(raw: &str) -> String {
    let raw = raw.trim();
    quick_xml::escape::unescape(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// This server's own identity, as published in its root description.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    /// Device UUID without the `uuid:` prefix.
    pub uuid: String,
    pub friendly_name: String,
    /// Base URL (`http://ip:port`) that presentation and service URLs hang off.
    pub base_url: String,
}

/// Renders the MediaServer:1 root description served at `/rootDesc.xml`.
#[must_use]
pub fn render_root_description(device: &LocalDevice) -> String {
    let name = html_escape::encode_text(&device.friendly_name);
    let base = html_escape::encode_text(&device.base_url);
    let uuid = html_escape::encode_text(&device.uuid);

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="{xmlns}">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <URLBase>{base}</URLBase>
  <device>
    <deviceType>{media_server}</deviceType>
    <friendlyName>{name}</friendlyName>
    <manufacturer>chirp</manufacturer>
    <modelName>chirp media server</modelName>
    <modelNumber>{version}</modelNumber>
    <UDN>uuid:{uuid}</UDN>
    <presentationURL>{base}/</presentationURL>
    <serviceList>
      <service>
        <serviceType>{content_directory}</serviceType>
        <serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
        <SCPDURL>/ContentDirectory/desc.xml</SCPDURL>
        <controlURL>/ContentDirectory/control</controlURL>
        <eventSubURL>/ContentDirectory/event</eventSubURL>
      </service>
      <service>
        <serviceType>{connection_manager}</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <SCPDURL>/ConnectionManager/desc.xml</SCPDURL>
        <controlURL>/ConnectionManager/control</controlURL>
        <eventSubURL>/ConnectionManager/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>
"#,
        xmlns = UPNP_DEVICE_XMLNS,
        media_server = NS_MEDIA_SERVER,
        content_directory = NS_CONTENT_DIRECTORY,
        connection_manager = NS_CONNECTION_MANAGER,
        version = env!("CARGO_PKG_VERSION"),
    )
}
