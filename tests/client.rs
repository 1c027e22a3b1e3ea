//! Client behaviour against a mocked IPUMS API.

use mockito::{Matcher, Server};
use nhgisapi::{
    Client, DatasetSelection, Error, ExtractStatus, MetadataQuery, NhgisExtract,
};
use reqwest::StatusCode;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

const KEY: &str = "test-api-key";

fn client(server: &Server) -> Client {
    Client::new(Some(KEY.to_string()), Some(server.url()), Some(true))
        .unwrap()
        .with_progress(false)
        .with_retry_max(1)
        .with_sleep_max(Duration::from_millis(10))
}

fn extract_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("collection".into(), "nhgis".into()),
        Matcher::UrlEncoded("version".into(), "2".into()),
    ])
}

fn mock_extract(server: &mut Server, id: u64, body: serde_json::Value) -> mockito::Mock {
    server
        .mock("GET", format!("/extracts/{}", id).as_str())
        .match_query(extract_query())
        .match_header("authorization", KEY)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create()
}

fn us2010() -> NhgisExtract {
    NhgisExtract::new()
        .with_dataset("us2010", DatasetSelection::new(["B01001"], ["state"]))
        .with_shapefiles(["us_state_2010"])
}

#[test]
fn submit_records_extract_number() {
    let mut server = Server::new();
    let submit = server
        .mock("POST", "/extracts")
        .match_query(extract_query())
        .match_header("authorization", KEY)
        .match_body(Matcher::PartialJson(json!({
            "collection": "nhgis",
            "datasets": {"us2010": {"dataTables": ["B01001"], "geogLevels": ["state"]}},
            "shapefiles": ["us_state_2010"]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"number": 42, "status": "queued"}"#)
        .create();

    let mut extract = us2010();
    let id = client(&server).submit_extract(&mut extract).unwrap();

    submit.assert();
    assert_eq!(id, 42);
    assert_eq!(extract.extract_id(), Some(42));
}

#[test]
fn rejected_submission_reports_validation_details() {
    let mut server = Server::new();
    server
        .mock("POST", "/extracts")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"type":"SemanticValidationError","status":{"code":400,"name":"Bad Request"},"detail":["Data table 'B01001' not found in dataset 'us2010'"]}"#,
        )
        .create();

    let mut extract = us2010();
    let err = client(&server).submit_extract(&mut extract).unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(err.to_string().contains("Data table 'B01001' not found"));
    assert_eq!(extract.extract_id(), None);
}

#[test]
fn submission_is_sent_once_even_on_server_error() {
    let mut server = Server::new();
    let submit = server
        .mock("POST", "/extracts")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("Bad Gateway")
        .expect(1)
        .create();

    let client = client(&server).with_retry_max(3);
    let mut extract = us2010();
    let err = client.submit_extract(&mut extract).unwrap_err();

    submit.assert();
    assert!(matches!(err, Error::Api { status, .. } if status == StatusCode::BAD_GATEWAY));
    assert_eq!(extract.extract_id(), None);
}

#[test]
fn status_lookups_make_retry_max_attempts() {
    let mut server = Server::new();
    let lookup = server
        .mock("GET", "/extracts/5")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(3)
        .create();

    let err = client(&server)
        .with_retry_max(3)
        .extract_status(5u64, Some("nhgis"))
        .unwrap_err();

    lookup.assert();
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[test]
fn truncated_reply_body_is_an_http_error() {
    let mut server = Server::new();
    server
        .mock("GET", "/extracts/6")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            w.write_all(br#"{"number": 6, "status": "comp"#)?;
            Err(std::io::Error::other("connection dropped"))
        })
        .create();

    let err = client(&server).extract_status(6u64, Some("nhgis")).unwrap_err();
    assert!(matches!(err, Error::Http(_)), "unexpected error: {err:?}");
}

#[test]
fn download_writes_one_file_per_link() {
    let mut server = Server::new();
    let table_url = format!("{}/downloads/nhgis/42/nhgis0042_csv.zip", server.url());
    let gis_url = format!("{}/downloads/nhgis/42/nhgis0042_shape.zip?expires=1", server.url());
    let table_bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let gis_bytes = b"shape archive".to_vec();

    mock_extract(
        &mut server,
        42,
        json!({
            "number": 42,
            "status": "completed",
            "downloadLinks": {
                "tableData": {"url": table_url, "bytes": table_bytes.len()},
                "gisData": {"url": gis_url, "bytes": gis_bytes.len()}
            }
        }),
    );
    let table = server
        .mock("GET", "/downloads/nhgis/42/nhgis0042_csv.zip")
        .match_header("authorization", KEY)
        .with_status(200)
        .with_body(&table_bytes)
        .create();
    let gis = server
        .mock("GET", "/downloads/nhgis/42/nhgis0042_shape.zip")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(&gis_bytes)
        .create();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("nhgis0042_csv.zip"), b"stale").unwrap();

    let written = client(&server)
        .download_extract(42u64, Some("nhgis"), Some(dir.path()))
        .unwrap();

    table.assert();
    gis.assert();
    assert_eq!(
        written,
        vec![dir.path().join("nhgis0042_csv.zip"), dir.path().join("nhgis0042_shape.zip")]
    );
    assert_eq!(std::fs::read(&written[0]).unwrap(), table_bytes);
    assert_eq!(std::fs::read(&written[1]).unwrap(), gis_bytes);
}

#[test]
fn download_of_submitted_extract_uses_its_number() {
    let mut server = Server::new();
    server
        .mock("POST", "/extracts")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"number": 7}"#)
        .create();
    let table_url = format!("{}/files/nhgis0007_csv.zip", server.url());
    mock_extract(
        &mut server,
        7,
        json!({"status": "completed", "downloadLinks": {"tableData": {"url": table_url}}}),
    );
    server.mock("GET", "/files/nhgis0007_csv.zip").with_body("csv").create();

    let client = client(&server);
    let mut extract = us2010();
    client.submit_extract(&mut extract).unwrap();

    let dir = tempfile::tempdir().unwrap();
    // The extract's own collection is used; no collection argument needed.
    let written = client.download_extract(&extract, None, Some(dir.path())).unwrap();
    assert_eq!(written, vec![dir.path().join("nhgis0007_csv.zip")]);
}

#[test]
fn failed_extract_never_requests_links() {
    let mut server = Server::new();
    let link_url = format!("{}/files/nhgis0005_csv.zip", server.url());
    mock_extract(
        &mut server,
        5,
        json!({"status": "failed", "downloadLinks": {"tableData": {"url": link_url}}}),
    );
    let link = server.mock("GET", "/files/nhgis0005_csv.zip").expect(0).create();

    let dir = tempfile::tempdir().unwrap();
    let err = client(&server)
        .download_extract(5u64, Some("nhgis"), Some(dir.path()))
        .unwrap_err();

    link.assert();
    match err {
        Error::ExtractFailure { id, collection } => {
            assert_eq!(id, 5);
            assert_eq!(collection, "nhgis");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn unknown_extract_is_not_found() {
    let mut server = Server::new();
    server
        .mock("GET", "/extracts/404")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"type":"NotFound","status":{"code":404,"name":"Not Found"},"detail":"Extract not found"}"#)
        .create();

    let client = client(&server);
    assert_eq!(
        client.extract_status(404u64, Some("nhgis")).unwrap(),
        ExtractStatus::NotFound
    );

    let dir = tempfile::tempdir().unwrap();
    let err = client
        .download_extract(404u64, Some("nhgis"), Some(dir.path()))
        .unwrap_err();
    assert!(matches!(err, Error::ExtractNotFound { id: 404, .. }));
    assert!(err.to_string().contains("Submit the extract"));
}

#[test]
fn unfinished_extract_is_not_ready() {
    let mut server = Server::new();
    mock_extract(&mut server, 9, json!({"status": "started", "downloadLinks": {}}));

    let dir = tempfile::tempdir().unwrap();
    let err = client(&server)
        .download_extract(9u64, Some("nhgis"), Some(dir.path()))
        .unwrap_err();
    match err {
        Error::ExtractNotReady(msg) => assert!(msg.contains("not finished yet")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn expired_links_hint_depends_on_handle() {
    let mut server = Server::new();
    server
        .mock("POST", "/extracts")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"number": 11}"#)
        .create();
    mock_extract(&mut server, 11, json!({"status": "completed", "downloadLinks": {}}));

    let client = client(&server);
    let dir = tempfile::tempdir().unwrap();

    let by_id = client
        .download_extract(11u64, Some("nhgis"), Some(dir.path()))
        .unwrap_err();
    match by_id {
        Error::ExtractNotReady(msg) => {
            assert!(msg.contains("has expired"));
            assert!(msg.contains("get_extract_by_id"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let mut extract = us2010();
    client.submit_extract(&mut extract).unwrap();
    let by_object = client
        .download_extract(&extract, None, Some(dir.path()))
        .unwrap_err();
    match by_object {
        Error::ExtractNotReady(msg) => {
            assert!(msg.contains("has expired"));
            assert!(msg.contains("resubmit this extract object"));
            assert!(!msg.contains("get_extract_by_id"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn bare_id_without_collection_is_rejected_before_any_request() {
    let mut server = Server::new();
    let any = server.mock("GET", Matcher::Any).expect(0).create();

    let err = client(&server)
        .download_extract(1u64, None, None)
        .unwrap_err();

    any.assert();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn missing_download_dir_is_not_found() {
    let mut server = Server::new();
    let any = server.mock("GET", Matcher::Any).expect(0).create();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");

    let err = client(&server)
        .download_extract(1u64, Some("nhgis"), Some(&missing))
        .unwrap_err();

    any.assert();
    match err {
        Error::NotFound(msg) => assert!(msg.contains("nope")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn link_error_status_aborts_download() {
    let mut server = Server::new();
    let table_url = format!("{}/files/a.zip", server.url());
    let gis_url = format!("{}/files/b.zip", server.url());
    mock_extract(
        &mut server,
        3,
        json!({"status": "completed", "downloadLinks": {
            "tableData": {"url": table_url},
            "gisData": {"url": gis_url}
        }}),
    );
    server.mock("GET", "/files/a.zip").with_status(403).create();
    let second = server.mock("GET", "/files/b.zip").expect(0).create();

    let dir = tempfile::tempdir().unwrap();
    let err = client(&server)
        .download_extract(3u64, Some("nhgis"), Some(dir.path()))
        .unwrap_err();

    second.assert();
    assert!(matches!(err, Error::Http(_)));
    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
}

#[test]
fn wait_returns_on_completion_and_fails_on_failure() {
    let mut server = Server::new();
    mock_extract(&mut server, 1, json!({"status": "completed"}));
    mock_extract(&mut server, 2, json!({"status": "canceled"}));

    let client = client(&server);
    client.wait_for_extract(1u64, Some("nhgis")).unwrap();
    assert!(matches!(
        client.wait_for_extract(2u64, Some("nhgis")),
        Err(Error::ExtractFailure { id: 2, .. })
    ));
}

#[test]
fn wait_gives_up_after_timeout() {
    let mut server = Server::new();
    mock_extract(&mut server, 8, json!({"status": "queued"}));

    let err = client(&server)
        .with_wait_timeout(Duration::ZERO)
        .wait_for_extract(8u64, Some("nhgis"))
        .unwrap_err();
    match err {
        Error::ExtractNotReady(msg) => assert!(msg.contains("still queued")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn extract_definition_can_be_resubmitted() {
    let mut server = Server::new();
    mock_extract(
        &mut server,
        12,
        json!({
            "number": 12,
            "status": "completed",
            "downloadLinks": {},
            "extractDefinition": {
                "collection": "nhgis",
                "version": 2,
                "description": "old extract",
                "datasets": {"us2010": {"dataTables": ["B01001"], "geogLevels": ["state"]}},
                "shapefiles": ["us_state_2010"],
                "dataFormat": "csv_header",
                "breakdownAndDataTypeLayout": "single_file"
            }
        }),
    );

    let extract = client(&server).get_extract_by_id(12, "nhgis").unwrap();
    assert_eq!(extract.extract_id(), None);
    assert_eq!(extract.description(), "old extract");

    let body = extract.build();
    assert_eq!(body["dataFormat"], "csv_header");
    assert_eq!(body["datasets"]["us2010"]["dataTables"], json!(["B01001"]));
    assert_eq!(body["shapefiles"], json!(["us_state_2010"]));
}

#[test]
fn metadata_listing_follows_next_page_links() {
    let mut server = Server::new();
    let next = format!("{}/metadata/nhgis/datasets?pageNumber=2&pageSize=2&version=2", server.url());

    // The server may send more records than requested.
    let first = server
        .mock("GET", "/metadata/nhgis/datasets")
        .match_query(Matcher::Regex("^version=2&pageSize=2$".into()))
        .match_header("authorization", KEY)
        .with_status(200)
        .with_body(
            json!({
                "data": [{"name": "1790_cPop"}, {"name": "1800_cPop"}, {"name": "1810_cPop"}],
                "pageNumber": 1,
                "pageSize": 2,
                "links": {"previousPage": null, "nextPage": next}
            })
            .to_string(),
        )
        .create();
    let second = server
        .mock("GET", "/metadata/nhgis/datasets")
        .match_query(Matcher::Regex("pageNumber=2".into()))
        .with_status(200)
        .with_body(
            json!({
                "data": [{"name": "1820_cPop"}],
                "pageNumber": 2,
                "links": {"previousPage": "x", "nextPage": null}
            })
            .to_string(),
        )
        .create();

    let records = client(&server)
        .metadata(&MetadataQuery::listing("datasets").with_page_size(2))
        .unwrap();

    first.assert();
    second.assert();
    let names: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["1790_cPop", "1800_cPop", "1810_cPop", "1820_cPop"]);
}

#[test]
fn metadata_page_limit_is_enforced() {
    let mut server = Server::new();
    let next = format!("{}/metadata/nhgis/shapefiles?pageNumber=2", server.url());
    server
        .mock("GET", "/metadata/nhgis/shapefiles")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"data": [{"name": "a"}], "links": {"nextPage": next}}).to_string())
        .create();

    let err = client(&server)
        .with_max_pages(1)
        .metadata(&MetadataQuery::listing("shapefiles"))
        .unwrap_err();
    assert!(matches!(err, Error::PageLimitExceeded { limit: 1 }));
}

#[test]
fn metadata_record_lookups() {
    let mut server = Server::new();
    let table = server
        .mock("GET", "/metadata/nhgis/datasets/1990_STF1/data_tables/NP1")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("version".into(), "2".into()),
            Matcher::UrlEncoded("pageSize".into(), "2500".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"name":"NP1","description":"Persons","universe":"Persons"}"#)
        .create();
    let tst = server
        .mock("GET", "/metadata/nhgis/time_series_tables/A00")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"name":"A00","description":"Total Population"}"#)
        .create();

    let client = client(&server);
    let record = client
        .metadata(&MetadataQuery::new().with_dataset("1990_STF1").with_data_table("NP1"))
        .unwrap();
    assert_eq!(record["description"], "Persons");

    let record = client
        .metadata(&MetadataQuery::new().with_time_series_table("A00"))
        .unwrap();
    assert_eq!(record["description"], "Total Population");

    table.assert();
    tst.assert();
}

#[test]
fn metadata_rejects_bad_queries_without_requests() {
    let mut server = Server::new();
    let any = server.mock("GET", Matcher::Any).expect(0).create();
    let client = client(&server);

    match client.metadata(&MetadataQuery::listing("geog_levels")).unwrap_err() {
        Error::NotFound(msg) => assert!(msg.contains("\"geog_levels\" is not a valid metadata endpoint")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(
        client.metadata(&MetadataQuery::new()),
        Err(Error::InvalidArgument(_))
    ));

    any.assert();
}
