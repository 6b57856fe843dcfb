fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use peershare_protocol::messages::{ContentRequest, FileChunk};
    use peershare_protocol::{DEFAULT_CHUNK_SIZE, FileId, PeerMessage, decode, encode};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_text(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&load_text(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Decodes a fixture through the wire codec, encodes it again and
    /// compares the JSON values (field order independent).
    fn roundtrip_test(name: &str) -> PeerMessage {
        let fixture = load_fixture(name);
        let parsed = decode(load_text(name).trim())
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let reencoded = encode(&parsed).unwrap_or_else(|e| panic!("failed to encode {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_str(&reencoded).unwrap();
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Chunked transfer ---

    #[test]
    fn fixture_file_header() {
        let PeerMessage::FileHeader(header) = roundtrip_test("file_header.json") else {
            panic!("expected file-header");
        };
        assert_eq!(header.total_chunks, Some(3));
        assert_eq!(header.chunk_size, Some(262_144));
        assert_eq!(header.metadata("peer-x").original_sender_id, "peer-a");
    }

    #[test]
    fn fixture_file_header_without_layout() {
        let PeerMessage::FileHeader(header) = roundtrip_test("file_header_legacy.json") else {
            panic!("expected file-header");
        };
        assert_eq!(header.total_chunks, None);
        assert_eq!(header.chunk_size, None);
    }

    #[test]
    fn fixture_file_chunk() {
        let PeerMessage::FileChunk(chunk) = roundtrip_test("file_chunk.json") else {
            panic!("expected file-chunk");
        };
        assert_eq!(&chunk.data[..], b"Hello, world!");
        assert_eq!(chunk.resolved_index(DEFAULT_CHUNK_SIZE).unwrap(), 2);
    }

    #[test]
    fn fixture_file_chunk_without_index() {
        let PeerMessage::FileChunk(chunk) = roundtrip_test("file_chunk_legacy.json") else {
            panic!("expected file-chunk");
        };
        let FileChunk {
            chunk_index,
            offset,
            ..
        } = &chunk;
        assert_eq!(*chunk_index, None);
        assert_eq!(*offset, 524_288);
        assert_eq!(chunk.resolved_index(DEFAULT_CHUNK_SIZE).unwrap(), 2);
    }

    #[test]
    fn fixture_file_complete() {
        let msg = roundtrip_test("file_complete.json");
        assert_eq!(msg.type_name(), "file-complete");
        assert_eq!(msg.file_id(), Some(&FileId::new("report.pdf-1700000000000")));
    }

    // --- Metadata announce and on-demand content ---

    #[test]
    fn fixture_file_info() {
        let PeerMessage::FileInfo(info) = roundtrip_test("file_info.json") else {
            panic!("expected file-info");
        };
        assert!(info.direct_download);
        assert_eq!(info.metadata("peer-x").total_size, 52_428_800);
    }

    #[test]
    fn fixture_file_info_forwarded() {
        let PeerMessage::FileInfo(info) = roundtrip_test("file_info_forwarded.json") else {
            panic!("expected file-info");
        };
        assert!(!info.direct_download);
    }

    #[test]
    fn fixture_streaming_request() {
        let msg = roundtrip_test("streaming_request.json");
        assert!(matches!(msg, PeerMessage::ContentRequest(_)));
    }

    #[test]
    fn fixture_content_request_alias() {
        let msg = decode(load_text("content_request_alias.json").trim()).unwrap();
        assert_eq!(
            msg,
            PeerMessage::ContentRequest(ContentRequest {
                file_id: FileId::new("slides.key-1700000000500"),
                file_name: "slides.key".into(),
                file_type: String::new(),
                file_size: 0,
            })
        );
        // Re-encoded under the primary name.
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "streaming-request");
    }

    #[test]
    fn fixture_streaming_error() {
        let PeerMessage::StreamingError(err) = roundtrip_test("streaming_error.json") else {
            panic!("expected streaming-error");
        };
        assert_eq!(err.error, "File not found");
    }

    #[test]
    fn fixture_content_forward() {
        let PeerMessage::ContentForward(fwd) = roundtrip_test("content_forward.json") else {
            panic!("expected content-forward");
        };
        assert_eq!(fwd.requester_id, "peer-c");
        assert_eq!(fwd.metadata().original_sender_id, "peer-a");
    }

    #[test]
    fn fixture_content_response() {
        let PeerMessage::ContentResponse(resp) = roundtrip_test("content_response.json") else {
            panic!("expected content-response");
        };
        assert_eq!(resp.requester_id, "peer-c");
        let PeerMessage::FileChunk(chunk) = *resp.message else {
            panic!("expected nested file-chunk");
        };
        assert_eq!(&chunk.data[..], &[0, 1, 2, 3, 4]);
    }

    // --- Connection lifecycle ---

    #[test]
    fn fixture_keep_alive() {
        let msg = roundtrip_test("keep_alive.json");
        assert!(matches!(msg, PeerMessage::KeepAlive(ref k) if k.peer_id == "peer-b"));
        assert!(msg.file_id().is_none());
    }

    #[test]
    fn fixture_keep_alive_response() {
        let msg = roundtrip_test("keep_alive_response.json");
        assert!(matches!(msg, PeerMessage::KeepAliveResponse(_)));
    }

    #[test]
    fn fixture_disconnect_notification() {
        let msg = roundtrip_test("disconnect_notification.json");
        assert_eq!(msg.type_name(), "disconnect-notification");
    }

    #[test]
    fn every_fixture_has_a_known_type() {
        let mut count = 0;
        for entry in fs::read_dir(fixtures_dir()).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).unwrap();
            decode(text.trim())
                .unwrap_or_else(|e| panic!("{} does not decode: {e}", path.display()));
            count += 1;
        }
        assert_eq!(count, 15);
    }
}
