mod external;
mod local_model;
mod simulated;

pub use external::{extract_garment_label, ExternalInferenceSource, EXTERNAL_CONFIDENCE};
pub use local_model::{LocalModelSource, DEFAULT_INPUT_SIZE};
pub use simulated::{SimulatedSource, SIMULATED_CONFIDENCE_RANGE};
