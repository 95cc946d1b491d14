mod delta;
mod snapshot;

pub use delta::{DeltaPacket, DeltaRecord, decode, encode};
pub use snapshot::{
    ComponentPayload, Snapshot, SnapshotEncoding, deserialize, serialize, state_hash,
};
