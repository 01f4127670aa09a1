pub mod live;
pub mod paper;

pub use live::DhanLiveBroker;
pub use paper::PaperBroker;
