//! **Boot** endurance **sweep** harness
//!
//! Power cycles a device under test from a programmable supply across a descending voltage sweep,
//! watches its serial console to classify every boot, and records the supply current captured
//! during each boot window.
//!
//! The [`orchestrator::CycleOrchestrator`] is written against two capabilities,
//! [`supply::PowerSource`] and [`link::SerialLink`], so the sweep logic can run against any
//! instrument and transport that provides them.

pub mod attempt;
pub mod budget;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod lines;
pub mod link;
pub mod orchestrator;
pub mod plan;
pub mod record;
pub mod supply;
pub mod toggle;
pub mod units;

pub use attempt::{ CycleAttempt, PowerTrace };
pub use budget::Deadline;
pub use cancel::{ cancel_pair, Cancel, CancelHandle };
pub use classify::{ BootClassifier, BootOutcome, MarkerSet };
pub use link::{ resolve, LinkAcquirer };
pub use orchestrator::{ AnomalyPolicy, CycleOrchestrator, CycleSettings, RunError, RunSummary };
pub use plan::{ ConfigError, VoltagePlan };
pub use record::{ CsvRecorder, TelemetryRecorder };
pub use supply::{ PowerSource, Sample, SupplyLimits };
pub use units::Volt;
