pub mod file_input_adapter;
pub mod snapshot_adapter;

pub use file_input_adapter::FileInputAdapter;
pub use snapshot_adapter::FileSnapshotAdapter;
