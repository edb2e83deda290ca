/// Basic unit tests for the wire types and registries
use excel_mcp_server::*;
use serde_json::json;

#[cfg(test)]
mod basic_unit_tests {
    use super::*;

    #[test]
    fn test_inbound_call_and_cancel_decode() {
        let call = InboundMessage::decode(
            br#"{"requestId": "r1", "tool": "write_data_to_excel", "arguments": {"filepath": "a.xlsx"}}"#,
        )
        .unwrap();
        match call {
            InboundMessage::Call(call) => {
                assert_eq!(call.request_id, RequestId::from("r1"));
                assert_eq!(call.tool, "write_data_to_excel");
                assert_eq!(call.arguments["filepath"], "a.xlsx");
            }
            other => panic!("expected a call, got {:?}", other),
        }

        let cancel = InboundMessage::decode(br#"{"cancel": 42}"#).unwrap();
        assert_eq!(cancel, InboundMessage::cancel(42));
    }

    #[test]
    fn test_malformed_messages() {
        for body in ["not json", r#"{"tool": "x"}"#, r#"{"requestId": 1}"#, "[]"] {
            let err = InboundMessage::decode(body.as_bytes()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedRequest);
        }
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = serde_json::to_value(Response::ok(RequestId::from("r1"), 2, json!({"rows": 1}))).unwrap();
        assert_eq!(ok, json!({"requestId": "r1", "seq": 2, "status": "ok", "payload": {"rows": 1}}));

        let err = Response::error(Some(RequestId::from(7)), 0, &DispatchError::UnknownTool {
            name: "delete_workbook".to_string(),
        });
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["requestId"], 7);
        assert_eq!(err["status"], "error");
        assert_eq!(err["error"]["kind"], "UnknownTool");
        assert_eq!(err["error"]["code"], -32601);
        assert!(err.get("payload").is_none());
    }

    #[test]
    fn test_error_kinds_and_codes() {
        let cases = [
            (
                DispatchError::SchemaValidation { message: "arguments: expected object".to_string() },
                ErrorKind::SchemaValidationError,
                -32602,
            ),
            (DispatchError::Cancelled, ErrorKind::Cancelled, -32002),
            (
                DispatchError::AdmissionRejected { in_flight: 4, queued: 8 },
                ErrorKind::AdmissionRejected,
                -32003,
            ),
            (
                DispatchError::from(HandlerError::new("workbook_not_found", "missing")),
                ErrorKind::HandlerError,
                -32000,
            ),
        ];
        for (error, kind, code) in cases {
            assert_eq!(error.kind(), kind);
            assert_eq!(error.protocol_code(), code);
        }
    }

    #[test]
    fn test_excel_registry_rejects_duplicates() {
        let backend: std::sync::Arc<dyn WorkbookBackend> = std::sync::Arc::new(MemoryWorkbooks::new());
        let mut registry = ToolRegistry::new();
        register_excel_tools(&mut registry, backend.clone()).unwrap();

        let err = register_excel_tools(&mut registry, backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateTool);
    }

    #[test]
    fn test_excel_schemas_validate_arguments() {
        let mut registry = ToolRegistry::new();
        register_excel_tools(&mut registry, std::sync::Arc::new(MemoryWorkbooks::new())).unwrap();

        let read = &registry.resolve("read_data_from_excel").unwrap().descriptor;
        assert!(read.validate(&json!({"filepath": "a.xlsx", "sheet_name": "Sheet"})).is_ok());
        assert!(read
            .validate(&json!({"filepath": "a.xlsx", "sheet_name": "Sheet", "end_cell": "C3"}))
            .is_ok());

        let err = read.validate(&json!({"filepath": "a.xlsx", "sheet_name": 3})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaValidationError);

        let err = read.validate(&json!({"sheet_name": "Sheet"})).unwrap_err();
        assert!(err.to_string().contains("filepath"));
    }

    #[test]
    fn test_server_rejects_invalid_config() {
        let config = ServerConfig {
            outbound_capacity: 0,
            ..ServerConfig::default()
        };
        let result = ExcelMcpServer::new(config, std::sync::Arc::new(MemoryWorkbooks::new()));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
