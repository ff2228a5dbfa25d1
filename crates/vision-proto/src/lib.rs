//! Generated wire schema for the vision node.
//!
//! The streaming `Command`/`ServerMessage` pair plus the two unary
//! side-channel services. Everything here is produced by `tonic-build`;
//! only small timestamp helpers are hand-written.

pub mod data_types {
    tonic::include_proto!("data_types");
}

pub mod compute {
    tonic::include_proto!("compute");
}

pub mod app_comm {
    tonic::include_proto!("app_communication");
}

pub mod wakeup {
    tonic::include_proto!("wakeup");
}

/// Reserved `ConfigResponse.message` value that triggers peer shutdown.
pub const TERMINATE_ACK: &str = "terminate_ack";

/// Current `DetectionResult.version` emitted by this build.
pub const DETECTION_RESULT_VERSION: u32 = 1;

/// Wall-clock timestamp for message stamping.
pub fn timestamp_now() -> prost_types::Timestamp {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    prost_types::Timestamp {
        seconds: now.as_secs() as i64,
        nanos: now.subsec_nanos() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn command_payload_is_exactly_one_of() {
        let cmd = data_types::Command {
            sent_at: Some(timestamp_now()),
            payload: Some(data_types::command::Payload::Heartbeat(
                data_types::Heartbeat {
                    timestamp: Some(timestamp_now()),
                },
            )),
        };
        let bytes = cmd.encode_to_vec();
        let decoded = data_types::Command::decode(bytes.as_slice()).unwrap();
        match decoded.payload {
            Some(data_types::command::Payload::Heartbeat(_)) => {}
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn terminate_ack_is_stable() {
        // The literal is part of the wire contract; peers match on it.
        assert_eq!(TERMINATE_ACK, "terminate_ack");
    }
}
