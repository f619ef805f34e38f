//! Select, trim and redistribute miniSEED v2 records.
//!
//! Records are read from files, tested against time limits, source-name
//! regular expressions and selection lists, optionally trimmed at the
//! sample level, and written to a single output file, to any number of
//! templated archives, or both. Records that need no trimming are copied
//! byte for byte.
//!
//! # Filtering records in memory
//!
//! ```
//! use mseed_filter::criteria::{Criteria, Verdict};
//! use mseed_filter::{HpTime, MseedReader, MseedRecord, Samples, decode_header, encode};
//!
//! let record = MseedRecord::new()
//!     .with_nslc("IU", "ANMO", "00", "BHZ")
//!     .with_start_time(HpTime::from_secs(1_262_304_000))
//!     .with_sample_rate(1.0)
//!     .with_samples(Samples::Int(vec![1, 2, 3, 4]));
//! let data = encode(&record).unwrap();
//!
//! let criteria = Criteria {
//!     start: Some(HpTime::from_secs(1_262_304_010)),
//!     ..Default::default()
//! };
//!
//! for raw in MseedReader::new(&data[..]) {
//!     let raw = raw.unwrap();
//!     let header = decode_header(&raw.bytes).unwrap();
//!     let verdict = criteria.evaluate(&header.identity(), header.start_time, header.end_time());
//!     assert!(matches!(verdict, Verdict::Skip(_)));
//! }
//! ```
//!
//! # Expanding an archive template
//!
//! ```
//! use mseed_filter::archive::{ArchiveTemplate, Layout};
//! use mseed_filter::{HpTime, MseedRecord};
//!
//! let template = ArchiveTemplate::parse(&Layout::Bud.under("/data")).unwrap();
//! let record = MseedRecord::new()
//!     .with_nslc("IU", "ANMO", "00", "BHZ")
//!     .with_start_time(HpTime::from_secs(1_262_304_000));
//! assert_eq!(template.expand(&record), "/data/IU/ANMO/ANMO.IU.00.BHZ.2010.001");
//! ```

pub mod archive;
pub mod cli;
pub mod criteria;
pub mod decode;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod glob;
pub mod identity;
pub mod limits;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod selection;
pub mod summary;
pub mod time;
pub mod trim;
pub mod types;

pub use error::{FilterError, FilterResult, MseedError, Result};
pub use identity::Identity;
pub use reader::{MseedReader, RawRecord};
pub use record::{MseedRecord, Samples};
pub use time::{BTime, HpTime, NanoTime};
pub use types::{ByteOrder, EncodingFormat};

pub use decode::{decode, decode_header};
pub use encode::encode;
