//! `AddressItem`: an `Authority` plus the `timestamp`/`services` the `addr`
//! wire message carries for it (spec §3).

use std::str::FromStr;

use super::Authority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressItem {
    pub authority: Authority,
    pub timestamp: u32,
    pub services: u64,
}

impl AddressItem {
    pub fn new(authority: Authority, timestamp: u32, services: u64) -> Self {
        AddressItem {
            authority,
            timestamp,
            services,
        }
    }

    /// Parses the pool file line format: `authority/timestamp/services`,
    /// with `timestamp`/`services` defaulting to `0` when absent (spec §6).
    pub fn parse_line(line: &str) -> Option<AddressItem> {
        let mut parts = line.splitn(3, '/');
        let authority = Authority::from_str(parts.next()?.trim()).ok()?;
        let timestamp = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let services = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        Some(AddressItem::new(authority, timestamp, services))
    }

    pub fn to_line(self) -> String {
        format!(
            "{}/{}/{}",
            self.authority, self.timestamp, self.services
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_line() {
        let item = AddressItem::parse_line("127.0.0.1:8333/1700000000/1").unwrap();
        assert_eq!(item.authority.port(), 8333);
        assert_eq!(item.timestamp, 1_700_000_000);
        assert_eq!(item.services, 1);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let item = AddressItem::parse_line("127.0.0.1:8333").unwrap();
        assert_eq!(item.timestamp, 0);
        assert_eq!(item.services, 0);
    }

    #[test]
    fn round_trips_through_to_line() {
        let item = AddressItem::new("10.0.0.1:8333".parse().unwrap(), 5, 9);
        let parsed = AddressItem::parse_line(&item.to_line()).unwrap();
        assert_eq!(parsed, item);
    }
}
