pub mod clock;
pub mod models;
pub mod sensor_payload;
pub mod sensor_value;
pub mod status;
pub mod time_series;
pub mod topic;
