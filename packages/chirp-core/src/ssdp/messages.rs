//! Builders for the SSDP datagrams this server emits.

use crate::protocol_constants::{
    HEADER_CACHE_CONTROL, HEADER_CONTENT_LENGTH, HEADER_DATE, HEADER_EXT, HEADER_HOST,
    HEADER_LOCATION, HEADER_MAN, HEADER_MX, HEADER_NT, HEADER_NTS, HEADER_SERVER, HEADER_ST,
    HEADER_USN, MAN_DISCOVER, MAX_AGE_PREFIX, METHOD_MSEARCH, METHOD_NOTIFY, NTS_ALIVE,
    NTS_BYEBYE, SSDP_REQUEST_TARGET, USN_SEPARATOR, UUID_PREFIX,
};
use crate::utils::http_date;

use super::codec::{Headers, SsdpMessage, StartLine};

/// Identity stamped onto every outbound datagram.
#[derive(Debug, Clone)]
pub struct Advertiser {
    /// Own device UUID without the `uuid:` prefix.
    pub uuid: String,
    /// `HOST` header value, `<group>:<port>`.
    pub host: String,
    /// `SERVER` banner.
    pub server: String,
    /// Advertised `max-age` in seconds.
    pub max_age_secs: u64,
}

impl Advertiser {
    /// Returns the USN advertised for `nt`.
    ///
    /// The device's own `uuid:<id>` namespace is advertised bare; every other
    /// namespace becomes `uuid:<id>::<nt>`.
    #[must_use]
    pub fn usn_for(&self, nt: &str) -> String {
        let own = format!("{}{}", UUID_PREFIX, self.uuid);
        if nt == own {
            own
        } else {
            format!("{}{}{}", own, USN_SEPARATOR, nt)
        }
    }

    fn cache_control(&self) -> String {
        format!("{}{}", MAX_AGE_PREFIX, self.max_age_secs)
    }

    /// `NOTIFY ssdp:alive` for one namespace.
    #[must_use]
    pub fn alive(&self, nt: &str, location: &str) -> SsdpMessage {
        let headers: Headers = [
            (HEADER_HOST, self.host.clone()),
            (HEADER_CACHE_CONTROL, self.cache_control()),
            (HEADER_LOCATION, location.to_string()),
            (HEADER_SERVER, self.server.clone()),
            (HEADER_NT, nt.to_string()),
            (HEADER_USN, self.usn_for(nt)),
            (HEADER_NTS, NTS_ALIVE.to_string()),
            (HEADER_EXT, String::new()),
            (HEADER_DATE, http_date()),
            (HEADER_CONTENT_LENGTH, "0".to_string()),
        ]
        .into_iter()
        .collect();
        SsdpMessage::new(
            StartLine::request(METHOD_NOTIFY, SSDP_REQUEST_TARGET),
            headers,
        )
    }

    /// `NOTIFY ssdp:byebye` for one namespace.
    #[must_use]
    pub fn byebye(&self, nt: &str) -> SsdpMessage {
        let headers: Headers = [
            (HEADER_HOST, self.host.clone()),
            (HEADER_NT, nt.to_string()),
            (HEADER_USN, self.usn_for(nt)),
            (HEADER_NTS, NTS_BYEBYE.to_string()),
            (HEADER_SERVER, self.server.clone()),
            (HEADER_EXT, String::new()),
            (HEADER_DATE, http_date()),
            (HEADER_CONTENT_LENGTH, "0".to_string()),
        ]
        .into_iter()
        .collect();
        SsdpMessage::new(
            StartLine::request(METHOD_NOTIFY, SSDP_REQUEST_TARGET),
            headers,
        )
    }

    /// Unicast `HTTP/1.1 200 OK` answer to an M-SEARCH.
    #[must_use]
    pub fn search_response(&self, st: &str, location: &str) -> SsdpMessage {
        let headers: Headers = [
            (HEADER_CACHE_CONTROL, self.cache_control()),
            (HEADER_LOCATION, location.to_string()),
            (HEADER_SERVER, self.server.clone()),
            (HEADER_ST, st.to_string()),
            (HEADER_USN, self.usn_for(st)),
            (HEADER_EXT, String::new()),
            (HEADER_DATE, http_date()),
            (HEADER_CONTENT_LENGTH, "0".to_string()),
        ]
        .into_iter()
        .collect();
        SsdpMessage::new(StartLine::ok(), headers)
    }

    /// Multicast `M-SEARCH` for `st`.
    #[must_use]
    pub fn msearch(&self, st: &str, mx: u8) -> SsdpMessage {
        let headers: Headers = [
            (HEADER_HOST, self.host.clone()),
            (HEADER_ST, st.to_string()),
            (HEADER_MX, mx.to_string()),
            (HEADER_MAN, MAN_DISCOVER.to_string()),
            (HEADER_CONTENT_LENGTH, "0".to_string()),
        ]
        .into_iter()
        .collect();
        SsdpMessage::new(
            StartLine::request(METHOD_MSEARCH, SSDP_REQUEST_TARGET),
            headers,
        )
    }
}
