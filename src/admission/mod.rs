pub mod clock;
pub mod controller;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::SessionAdmissionController;
pub use types::{
    AdmissionConfig, AdmissionError, AdmissionStatus, CapacityState, Session, SessionKind,
    SessionToken,
};
