// Typed model layer for the Pronote educational-records service. Raw JSON
// payloads are decoded through per-entity attribute guides into fixed-shape
// structs; entities that need further data fetch it through an injected
// `Communication` channel.

pub mod communication;
pub mod decode;
pub mod error;
pub mod models;
pub mod registry;

pub use communication::{Communication, HttpCommunication};
pub use error::DataError;
pub use models::{Absences, Grade, Homework, Lesson, Period, StudentClass, Subject};
pub use registry::PeriodRegistry;
