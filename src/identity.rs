//! Channel identity and source names.
//!
//! A source name joins the network, station, location and channel codes and
//! the quality indicator with underscores, e.g. `IU_ANMO_00_BHZ_D`. Regular
//! expression criteria and selection globs are applied to this string.

use std::fmt;

/// Identity of the channel a record belongs to.
///
/// # Examples
///
/// ```
/// use mseed_filter::Identity;
///
/// let id = Identity::new("IU", "ANMO", "00", "BHZ", 'D');
/// assert_eq!(id.srcname(), "IU_ANMO_00_BHZ_D");
/// assert_eq!(id.to_string(), "IU_ANMO_00_BHZ_D");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub quality: char,
}

impl Identity {
    pub fn new(network: &str, station: &str, location: &str, channel: &str, quality: char) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
            quality,
        }
    }

    /// Source name including the quality indicator: `NET_STA_LOC_CHAN_Q`.
    pub fn srcname(&self) -> String {
        format!("{}_{}", self.srcname_without_quality(), self.quality)
    }

    /// Source name without the quality indicator: `NET_STA_LOC_CHAN`.
    pub fn srcname_without_quality(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.srcname())
    }
}
