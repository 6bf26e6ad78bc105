use serde_json::{Value, json};

pub fn openapi_spec() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Chat Stream API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Session-based chat with incremental event streaming.",
        },
        "paths": {
            "/": {
                "get": {
                    "summary": "Service info",
                    "responses": {
                        "200": {
                            "description": "Service name, version, and docs location",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "required": ["message", "version", "docs"],
                                        "properties": {
                                            "message": { "type": "string" },
                                            "version": { "type": "string" },
                                            "docs": { "type": "string" },
                                        },
                                    },
                                },
                            },
                        },
                    },
                },
            },
            "/health": {
                "get": {
                    "summary": "Health check",
                    "responses": {
                        "200": {
                            "description": "Service health",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "required": ["status"],
                                        "properties": {
                                            "status": { "type": "string", "enum": ["healthy"] },
                                        },
                                    },
                                },
                            },
                        },
                    },
                },
            },
            "/api/session/create": {
                "post": {
                    "summary": "Create session",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/CreateSessionRequest" },
                            },
                        },
                    },
                    "responses": {
                        "200": {
                            "description": "Created session",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/SessionResponse" },
                                },
                            },
                        },
                    },
                },
            },
            "/api/session/list": {
                "get": {
                    "summary": "List the 50 most recently active sessions",
                    "responses": {
                        "200": {
                            "description": "Sessions, most recent activity first",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/SessionResponse" },
                                    },
                                },
                            },
                        },
                    },
                },
            },
            "/api/session/{session_id}": {
                "get": {
                    "summary": "Get session",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                    ],
                    "responses": {
                        "200": {
                            "description": "Session",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/SessionResponse" },
                                },
                            },
                        },
                        "404": { "$ref": "#/components/responses/Error" },
                    },
                },
            },
            "/api/session/{session_id}/messages": {
                "get": {
                    "summary": "List session messages, oldest first",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                        {
                            "name": "limit",
                            "in": "query",
                            "required": false,
                            "description": "Return only the most recent N messages",
                            "schema": { "type": "integer", "minimum": 0 },
                        },
                    ],
                    "responses": {
                        "200": {
                            "description": "Messages",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/MessageRecord" },
                                    },
                                },
                            },
                        },
                        "404": { "$ref": "#/components/responses/Error" },
                    },
                },
            },
            "/api/upload": {
                "post": {
                    "summary": "Upload an image for a session",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "multipart/form-data": {
                                "schema": {
                                    "type": "object",
                                    "required": ["file", "session_id"],
                                    "properties": {
                                        "file": { "type": "string", "format": "binary" },
                                        "session_id": { "type": "string" },
                                    },
                                },
                            },
                        },
                    },
                    "responses": {
                        "200": {
                            "description": "Stored file",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/FileUploadResponse" },
                                },
                            },
                        },
                        "400": { "$ref": "#/components/responses/Error" },
                        "404": { "$ref": "#/components/responses/Error" },
                    },
                },
            },
            "/api/chat": {
                "post": {
                    "summary": "Send a message and stream the assistant turn",
                    "description": "Each event is one `data: <json>\\n\\n` line. Current-generation envelopes carry `type`, `data`, and `metadata {request_id, timestamp, sequence}`. The stream ends after `session_end`.",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/ChatRequest" },
                            },
                        },
                    },
                    "responses": {
                        "200": {
                            "description": "Event stream",
                            "headers": {
                                "X-Request-Id": {
                                    "description": "Request id carried by every event of the turn",
                                    "schema": { "type": "string" },
                                },
                            },
                            "content": {
                                "text/event-stream": {
                                    "schema": { "$ref": "#/components/schemas/EventEnvelope" },
                                },
                            },
                        },
                    },
                },
            },
            "/openapi.json": {
                "get": {
                    "summary": "OpenAPI document",
                    "responses": {
                        "200": {
                            "description": "OpenAPI JSON document",
                            "content": {
                                "application/json": {
                                    "schema": { "type": "object" },
                                },
                            },
                        },
                    },
                },
            },
            "/docs": {
                "get": {
                    "summary": "Scalar API reference UI",
                    "responses": {
                        "200": {
                            "description": "HTML page rendering the API reference",
                            "content": {
                                "text/html": {
                                    "schema": { "type": "string" },
                                },
                            },
                        },
                    },
                },
            },
        },
        "components": {
            "parameters": {
                "SessionIdPath": {
                    "name": "session_id",
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string" },
                },
            },
            "responses": {
                "Error": {
                    "description": "Request failed",
                    "content": {
                        "application/json": {
                            "schema": { "$ref": "#/components/schemas/ErrorResponse" },
                        },
                    },
                },
            },
            "schemas": {
                "ErrorResponse": {
                    "type": "object",
                    "required": ["error"],
                    "properties": {
                        "error": { "type": "string" },
                    },
                },
                "CreateSessionRequest": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "default": "New chat" },
                    },
                },
                "SessionResponse": {
                    "type": "object",
                    "required": ["session_id", "title", "created_at", "last_activity_at", "message_count"],
                    "properties": {
                        "session_id": { "type": "string" },
                        "title": { "type": "string" },
                        "created_at": { "type": "string", "format": "date-time" },
                        "last_activity_at": { "type": "string", "format": "date-time" },
                        "message_count": { "type": "integer", "minimum": 0 },
                    },
                },
                "MessageRecord": {
                    "type": "object",
                    "required": ["message_id", "session_id", "role", "content", "created_at"],
                    "properties": {
                        "message_id": { "type": "string" },
                        "session_id": { "type": "string" },
                        "role": { "type": "string", "enum": ["user", "assistant"] },
                        "content": { "type": "string" },
                        "metadata": { "type": "object", "additionalProperties": true },
                        "file_ids": { "type": "array", "items": { "type": "string" } },
                        "created_at": { "type": "string", "format": "date-time" },
                    },
                },
                "FileUploadResponse": {
                    "type": "object",
                    "required": ["file_id", "filename", "file_type", "file_size", "uploaded_at"],
                    "properties": {
                        "file_id": { "type": "string" },
                        "filename": { "type": "string" },
                        "file_type": { "type": "string" },
                        "file_size": { "type": "integer", "format": "int64", "minimum": 0 },
                        "uploaded_at": { "type": "string", "format": "date-time" },
                    },
                },
                "ChatRequest": {
                    "type": "object",
                    "required": ["session_id", "content"],
                    "properties": {
                        "session_id": { "type": "string" },
                        "content": { "type": "string" },
                        "file_ids": { "type": "array", "items": { "type": "string" } },
                    },
                },
                "EventMetadata": {
                    "type": "object",
                    "required": ["request_id", "timestamp", "sequence"],
                    "properties": {
                        "request_id": { "type": "string" },
                        "timestamp": { "type": "integer", "format": "int64", "description": "Milliseconds since UNIX epoch" },
                        "sequence": { "type": "integer", "format": "int64", "minimum": 0 },
                        "duration_ms": { "type": "integer", "format": "int64", "minimum": 0 },
                    },
                },
                "EventEnvelope": {
                    "type": "object",
                    "required": ["type", "data", "metadata"],
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": [
                                "session_start",
                                "thinking",
                                "content",
                                "tool_call_start",
                                "tool_call_progress",
                                "tool_call_end",
                                "data",
                                "error",
                                "session_end",
                            ],
                        },
                        "data": { "type": "object", "additionalProperties": true },
                        "metadata": { "$ref": "#/components/schemas/EventMetadata" },
                    },
                },
            },
        },
    })
}

pub fn scalar_docs_html(spec_url: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Chat Stream API Docs</title>
    <style>
      html, body, #app {{
        margin: 0;
        padding: 0;
        height: 100%;
        width: 100%;
      }}
    </style>
  </head>
  <body>
    <div id="app"></div>
    <script src="https://cdn.jsdelivr.net/npm/@scalar/api-reference"></script>
    <script>
      Scalar.createApiReference('#app', {{
        url: '{spec_url}',
      }});
    </script>
  </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::{openapi_spec, scalar_docs_html};

    #[test]
    fn openapi_spec_declares_chat_routes() {
        let spec = openapi_spec();
        assert_eq!(spec["openapi"], "3.1.0");
        for path in [
            "/health",
            "/api/session/create",
            "/api/session/list",
            "/api/session/{session_id}",
            "/api/session/{session_id}/messages",
            "/api/upload",
            "/api/chat",
            "/openapi.json",
            "/docs",
        ] {
            assert!(spec["paths"][path].is_object(), "missing path {path}");
        }
        assert!(spec["paths"]["/api/chat"]["post"]["responses"]["200"]["content"]["text/event-stream"].is_object());
        assert!(spec["components"]["parameters"]["SessionIdPath"].is_object());
        assert!(spec["components"]["schemas"]["EventEnvelope"].is_object());
    }

    #[test]
    fn every_event_kind_is_documented() {
        let spec = openapi_spec();
        let kinds = spec["components"]["schemas"]["EventEnvelope"]["properties"]["type"]["enum"]
            .as_array()
            .map(Vec::len)
            .unwrap_or_default();
        assert_eq!(kinds, 9);
    }

    #[test]
    fn scalar_html_uses_openapi_url_and_scalar_bundle() {
        let html = scalar_docs_html("/openapi.json");
        assert!(html.contains("https://cdn.jsdelivr.net/npm/@scalar/api-reference"));
        assert!(html.contains("Scalar.createApiReference('#app'"));
        assert!(html.contains("url: '/openapi.json'"));
    }
}
