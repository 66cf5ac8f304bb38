//! HTTP-level tests against a mock Box API
//!
//! These tests start a wiremock server and verify the requests the client
//! sends: paths, headers and exact JSON bodies, plus the create-then-update
//! fallback of metadata application.

use box_metadata::{
    BoxError, Client, ClientConfig, CustomField, Metadata, MetadataTarget, StructuredSource,
    TemplateCache, TemplateRef, TemplateScope,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a client pointed at the mock server, without retries
fn client_for(server: &MockServer) -> Client {
    let config = ClientConfig::new("test-token")
        .with_api_base_url(server.uri())
        .with_retry_count(1)
        .with_retry_delay(10);
    Client::new(config).unwrap()
}

fn metadata(value: serde_json::Value) -> Metadata {
    serde_json::from_value(value).unwrap()
}

fn conflict_body() -> serde_json::Value {
    json!({
        "type": "error",
        "status": 409,
        "code": "tuple_already_exists",
        "message": "Custom metadata already exists"
    })
}

/// Tests for writing metadata instances
#[cfg(test)]
mod apply_tests {
    use super::*;

    /// A new instance is created with a single POST and no update
    #[tokio::test]
    async fn test_create_new_instance() {
        // Arrange: Box accepts the create
        let server = MockServer::start().await;
        let values = metadata(json!({"vendor": "Acme"}));

        Mock::given(method("POST"))
            .and(path("/files/123/metadata/global/properties"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"vendor": "Acme"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "$parent": "file_123",
                "$template": "properties",
                "vendor": "Acme"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let applied = client
            .apply_metadata("123", &MetadataTarget::Properties, &values)
            .await
            .unwrap();

        // Assert
        assert!(!applied.updated);
        assert_eq!(applied.instance["vendor"], "Acme");
    }

    /// A conflict leads to exactly one read and one JSON-Patch update
    #[tokio::test]
    async fn test_conflict_switches_to_update() {
        // Arrange: the instance exists and already holds `vendor`
        let server = MockServer::start().await;
        let target = MetadataTarget::template("enterprise", "invoice");
        let values = metadata(json!({"vendor": "Acme", "total": "10"}));

        Mock::given(method("POST"))
            .and(path("/files/123/metadata/enterprise/invoice"))
            .respond_with(ResponseTemplate::new(409).set_body_json(conflict_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/123/metadata/enterprise/invoice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "$id": "abc",
                "$type": "invoice-1",
                "vendor": "Old Vendor"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/files/123/metadata/enterprise/invoice"))
            .and(header("content-type", "application/json-patch+json"))
            .and(body_json(json!([
                {"op": "replace", "path": "/vendor", "value": "Acme"},
                {"op": "add", "path": "/total", "value": "10"}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vendor": "Acme",
                "total": "10"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let applied = client.apply_metadata("123", &target, &values).await.unwrap();

        // Assert
        assert!(applied.updated);
        assert_eq!(applied.instance["total"], "10");
    }

    /// A failed read of the existing instance adds every key
    #[tokio::test]
    async fn test_conflict_with_unreadable_instance_adds_all_keys() {
        // Arrange
        let server = MockServer::start().await;
        let values = metadata(json!({"vendor": "Acme"}));

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(conflict_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "instance_not_found",
                "message": "Instance not found"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(body_json(json!([
                {"op": "add", "path": "/vendor", "value": "Acme"}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vendor": "Acme"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act & Assert
        let applied = assert_ok!(
            client
                .apply_metadata("123", &MetadataTarget::Properties, &values)
                .await
        );
        assert!(applied.updated);
    }

    /// Errors other than a conflict never trigger an update
    #[tokio::test]
    async fn test_other_errors_do_not_update() {
        // Arrange
        let server = MockServer::start().await;
        let values = metadata(json!({"vendor": "Acme"}));

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "schema_validation_failed",
                "message": "The body is invalid"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let err = client
            .apply_metadata("123", &MetadataTarget::Properties, &values)
            .await
            .unwrap_err();

        // Assert
        match err {
            BoxError::Api { status, code, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code, "schema_validation_failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Reading an instance strips the `$` system keys
    #[tokio::test]
    async fn test_get_metadata_returns_user_fields() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/123/metadata/global/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "$id": "abc",
                "$version": 2,
                "vendor": "Acme"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let fields = client
            .get_metadata("123", &MetadataTarget::Properties)
            .await
            .unwrap();

        // Assert
        assert_eq!(fields, metadata(json!({"vendor": "Acme"})));
    }
}

/// Tests for the Box AI endpoints
#[cfg(test)]
mod extraction_tests {
    use super::*;

    /// Template extraction sends the template reference and no agent override
    #[tokio::test]
    async fn test_structured_extraction_with_template() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/extract_structured"))
            .and(body_json(json!({
                "items": [{"id": "123", "type": "file"}],
                "metadata_template": {
                    "template_key": "invoice",
                    "scope": "enterprise",
                    "type": "metadata_template"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": {"vendor": "Acme", "total": 12.5},
                "created_at": "2024-05-01T10:00:00Z",
                "completion_reason": "done"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let source = StructuredSource::Template(TemplateRef::new("enterprise", "invoice"));

        // Act
        let fields = client.extract_structured("123", &source).await.unwrap();

        // Assert
        assert_eq!(fields, metadata(json!({"vendor": "Acme", "total": 12.5})));
    }

    /// Field extraction sends the field list and reads top-level values
    #[tokio::test]
    async fn test_structured_extraction_with_fields() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/extract_structured"))
            .and(body_json(json!({
                "items": [{"id": "123", "type": "file"}],
                "fields": [{
                    "key": "vendor",
                    "displayName": "Vendor",
                    "type": "string"
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vendor": "Acme",
                "completion_reason": "done",
                "ai_agent_info": {"models": []}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let source = StructuredSource::Fields(vec![CustomField::new("vendor", "Vendor")]);

        // Act
        let fields = client.extract_structured("123", &source).await.unwrap();

        // Assert
        assert_eq!(fields, metadata(json!({"vendor": "Acme"})));
    }

    /// Freeform extraction parses a fenced JSON answer
    #[tokio::test]
    async fn test_freeform_extraction() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/extract"))
            .and(body_json(json!({
                "items": [{"id": "123", "type": "file"}],
                "prompt": "Who signed?"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "```json\n{\"signer\": \"Jane Doe\"}\n```",
                "completion_reason": "done"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let fields = client.extract_freeform("123", "Who signed?").await.unwrap();

        // Assert
        assert_eq!(fields, metadata(json!({"signer": "Jane Doe"})));
    }

    /// Ask sends the model override only when a model is given
    #[tokio::test]
    async fn test_ask_with_model() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/ask"))
            .and(body_partial_json(json!({
                "mode": "single_item_qa",
                "items": [{"id": "123", "type": "file"}],
                "ai_agent": {
                    "type": "ai_agent_ask",
                    "basic_text": {"model": "azure__openai__gpt_4o_mini"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "Invoices"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let response = client
            .ask("123", "What is this?", Some("azure__openai__gpt_4o_mini"))
            .await
            .unwrap();

        // Assert
        assert_eq!(response["answer"], "Invoices");
    }
}

/// Tests for template listing and file lookup
#[cfg(test)]
mod listing_tests {
    use super::*;

    fn template(key: &str) -> serde_json::Value {
        json!({
            "id": format!("id-{key}"),
            "templateKey": key,
            "scope": "enterprise_42",
            "displayName": key.to_uppercase(),
            "hidden": false,
            "fields": [{"key": "vendor", "type": "string", "displayName": "Vendor"}]
        })
    }

    /// Template listing follows `next_marker` until the last page
    #[tokio::test]
    async fn test_list_templates_follows_markers() {
        // Arrange: two pages
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata_templates/enterprise"))
            .and(query_param("marker", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [template("receipt")],
                "next_marker": null
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata_templates/enterprise"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [template("invoice")],
                "next_marker": "page2"
            })))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let templates = client.list_templates(TemplateScope::Enterprise).await.unwrap();

        // Assert
        let keys: Vec<&str> = templates.iter().map(|t| t.template_key.as_str()).collect();
        assert_eq!(keys, vec!["invoice", "receipt"]);
        assert_eq!(templates[0].fields[0].key, "vendor");
    }

    /// A failing scope is skipped when listing all templates
    #[tokio::test]
    async fn test_list_all_templates_skips_failing_scope() {
        // Arrange: enterprise listing is forbidden
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata_templates/enterprise"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": "access_denied_insufficient_permissions",
                "message": "Access denied"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata_templates/global"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [template("properties")]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let templates = client.list_all_templates().await.unwrap();

        // Assert
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].template_key, "properties");
    }

    /// The template cache drops listed templates without a display name
    #[tokio::test]
    async fn test_template_cache_skips_incomplete_templates() {
        // Arrange
        let server = MockServer::start().await;
        let mut unnamed = template("draft");
        unnamed["displayName"] = json!("");
        Mock::given(method("GET"))
            .and(path("/metadata_templates/enterprise"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [template("invoice"), unnamed]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata_templates/global"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut cache = TemplateCache::new();

        // Act
        let templates = cache.get(&client, false).await.unwrap();

        // Assert
        let keys: Vec<&str> = templates.iter().map(|t| t.template_key.as_str()).collect();
        assert_eq!(keys, vec!["invoice"]);
    }

    /// File lookup requests only the fields it needs
    #[tokio::test]
    async fn test_get_file_info() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/123"))
            .and(query_param("fields", "id,name,size,modified_at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "id": "123",
                "name": "invoice.pdf",
                "size": 2048,
                "modified_at": "2024-05-01T10:00:00-07:00"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);

        // Act
        let file = client.get_file_info("123").await.unwrap();

        // Assert
        assert_eq!(file.name, "invoice.pdf");
        assert_eq!(file.size, Some(2048));
    }
}

/// Tests for error mapping and retries
#[cfg(test)]
mod error_tests {
    use super::*;

    /// An expired token surfaces as Unauthorized without retrying
    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::new("expired")
            .with_api_base_url(server.uri())
            .with_retry_count(3)
            .with_retry_delay(10);
        let client = Client::new(config).unwrap();

        // Act
        let err = client.extract_freeform("123", "x").await.unwrap_err();

        // Assert
        assert!(matches!(err, BoxError::Unauthorized { status: 401, .. }));
    }

    /// Server errors are retried until an attempt succeeds
    #[tokio::test]
    async fn test_server_error_is_retried() {
        // Arrange: the first attempt fails with 503
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/extract"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ai/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "plain text"})))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::new("test-token")
            .with_api_base_url(server.uri())
            .with_retry_count(2)
            .with_retry_delay(10);
        let client = Client::new(config).unwrap();

        // Act
        let fields = client.extract_freeform("123", "x").await.unwrap();

        // Assert
        assert_eq!(fields["extracted_text"], "plain text");
    }

    /// When every attempt fails the caller sees the server's last error
    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/extract"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "code": "unavailable",
                "message": "Service unavailable"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let config = ClientConfig::new("test-token")
            .with_api_base_url(server.uri())
            .with_retry_count(2)
            .with_retry_delay(10);
        let client = Client::new(config).unwrap();

        // Act
        let err = client.extract_freeform("123", "x").await.unwrap_err();

        // Assert
        match err {
            BoxError::Api { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "Service unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// A closed client refuses every call
    #[tokio::test]
    async fn test_closed_client_refuses_calls() {
        // Arrange
        let server = MockServer::start().await;
        let client = client_for(&server);
        client.close().await;

        // Act & Assert
        let result = client.get_file_info("123").await;
        assert_err!(&result);
        assert!(matches!(result, Err(BoxError::ClientClosed)));
    }
}
