use std::time::Duration;

use opendrive_core::Session;
use opendrive_fs::{DirEntry, FsError, OpenDriveFs, PacerConfig, RemoteConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> RemoteConfig {
    RemoteConfig::new("alice", "secret")
        .with_endpoint(server.uri())
        .with_pacer(PacerConfig {
            min_sleep: Duration::from_millis(1),
            max_sleep: Duration::from_millis(5),
            decay_constant: 1,
            max_retries: Some(3),
            call_timeout: None,
        })
}

async fn open(server: &MockServer) -> OpenDriveFs {
    OpenDriveFs::with_session(config(server), Session::new("sid"))
        .await
        .unwrap()
}

fn listing(folders: serde_json::Value, files: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "Folders": folders, "Files": files }))
}

async fn mount_listing(
    server: &MockServer,
    folder_id: &str,
    folders: serde_json::Value,
    files: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path(format!("/folder/list.json/sid/{folder_id}")))
        .respond_with(listing(folders, files))
        .mount(server)
        .await;
}

async fn mount_create_folder(server: &MockServer, parent: &str, name: &str, new_id: &str) {
    Mock::given(method("POST"))
        .and(path("/folder.json"))
        .and(body_partial_json(json!({
            "session_id": "sid",
            "folder_name": name,
            "folder_sub_parent": parent,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "FolderID": new_id })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_runs_before_anything_else() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/login.json"))
        .and(body_partial_json(json!({ "username": "alice", "passwd": "secret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "SessionID": "fresh-sid",
            "UserName": "alice"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fs = OpenDriveFs::new(config(&server)).await.unwrap();

    assert_eq!(fs.session().id(), "fresh-sid");
    assert_eq!(fs.root(), "");
    assert_eq!(fs.precision(), Duration::from_secs(1));
}

#[tokio::test]
async fn mkdir_creates_each_missing_level_once() {
    let server = MockServer::start().await;
    mount_listing(&server, "0", json!([]), json!([])).await;
    mount_listing(&server, "A", json!([]), json!([])).await;
    mount_listing(&server, "B", json!([]), json!([])).await;
    mount_create_folder(&server, "0", "a", "A").await;
    mount_create_folder(&server, "A", "b", "B").await;
    mount_create_folder(&server, "B", "c", "C").await;

    let fs = open(&server).await;
    fs.mkdir("a/b/c").await.unwrap();
    let after_first = server.received_requests().await.unwrap().len();

    fs.mkdir("a/b/c").await.unwrap();
    fs.mkdir("/a/b/c/").await.unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), after_first);
    server.verify().await;
}

#[tokio::test]
async fn mkdir_reuses_existing_folders() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "P", "Name": "photos", "DateModified": 1 }]),
        json!([]),
    )
    .await;
    mount_listing(&server, "P", json!([]), json!([])).await;
    mount_create_folder(&server, "P", "2024", "Y").await;

    let fs = open(&server).await;
    fs.mkdir("photos/2024").await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn mkdir_escapes_reserved_characters() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "Q", "Name": "what\u{FF1F}", "DateModified": 1 }]),
        json!([]),
    )
    .await;
    mount_listing(&server, "Q", json!([]), json!([])).await;
    mount_create_folder(&server, "Q", "a\u{FF1A}b", "R").await;

    let fs = open(&server).await;
    fs.mkdir("what?/a:b").await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn rmdir_refuses_non_empty_folder() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "N", "Name": "nonempty", "DateModified": 1 }]),
        json!([]),
    )
    .await;
    mount_listing(
        &server,
        "N",
        json!([]),
        json!([{ "FileId": "F", "Name": "keep.txt", "Size": "1", "DateModified": "1" }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/folder/remove.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let fs = open(&server).await;
    let err = fs.rmdir("nonempty").await.expect_err("expected conflict");

    assert!(matches!(err, FsError::Conflict(_)));
    server.verify().await;
}

#[tokio::test]
async fn rmdir_removes_empty_folder_and_forgets_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/folder/list.json/sid/0"))
        .respond_with(listing(
            json!([{ "FolderID": "E", "Name": "empty", "DateModified": 1 }]),
            json!([]),
        ))
        .expect(2)
        .mount(&server)
        .await;
    mount_listing(&server, "E", json!([]), json!([])).await;
    Mock::given(method("POST"))
        .and(path("/folder/remove.json"))
        .and(body_partial_json(json!({ "session_id": "sid", "folder_id": "E" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let fs = open(&server).await;
    fs.rmdir("empty").await.unwrap();
    // The cached ID is gone, so the next lookup lists the root again.
    fs.mkdir("empty").await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn purge_removes_without_listing_contents() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "N", "Name": "full", "DateModified": 1 }]),
        json!([]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/folder/list.json/sid/N"))
        .respond_with(listing(json!([]), json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/folder/remove.json"))
        .and(body_partial_json(json!({ "folder_id": "N" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let fs = open(&server).await;
    fs.purge("full").await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn purge_of_account_root_is_refused() {
    let server = MockServer::start().await;
    let fs = open(&server).await;

    assert!(matches!(fs.purge("").await, Err(FsError::CantPurgeRoot)));
    assert!(matches!(fs.rmdir("/").await, Err(FsError::CantPurgeRoot)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn rmdir_of_missing_folder_reports_directory_not_found() {
    let server = MockServer::start().await;
    mount_listing(&server, "0", json!([]), json!([])).await;

    let fs = open(&server).await;
    let err = fs.rmdir("ghost").await.expect_err("expected missing folder");

    assert!(matches!(err, FsError::DirectoryNotFound(_)));
}

async fn mount_tree(server: &MockServer) {
    mount_listing(
        server,
        "0",
        json!([{ "FolderID": "A", "Name": "a", "DateModified": 1700000000, "ChildFolders": 1 }]),
        json!([{ "FileId": "F0", "Name": "top.txt", "Size": "3", "DateModified": "1700000001" }]),
    )
    .await;
    mount_listing(
        server,
        "A",
        json!([{ "FolderID": "B", "Name": "b", "DateModified": 1700000002 }]),
        json!([{ "FileId": "F1", "Name": "a1.txt", "Size": 5, "DateModified": 1700000003 }]),
    )
    .await;
    mount_listing(
        server,
        "B",
        json!([]),
        json!([{
            "FileId": "F2",
            "Name": "b1\u{FF1F}.txt",
            "Size": 8,
            "DateModified": 1700000004,
            "FileHash": "0123456789abcdef0123456789abcdef"
        }]),
    )
    .await;
}

fn remotes(entries: &[DirEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            if entry.is_dir() {
                format!("{}/", entry.remote())
            } else {
                entry.remote().to_string()
            }
        })
        .collect()
}

#[tokio::test]
async fn list_walks_whole_tree_breadth_first() {
    let server = MockServer::start().await;
    mount_tree(&server).await;

    let fs = open(&server).await;
    let entries = fs.list("", None).await.unwrap().collect().await.unwrap();

    assert_eq!(
        remotes(&entries),
        vec!["a/", "top.txt", "a/b/", "a/a1.txt", "a/b/b1?.txt"]
    );
    let DirEntry::Object(deep) = &entries[4] else {
        panic!("expected a file");
    };
    assert_eq!(deep.id(), "F2");
    assert_eq!(deep.size(), 8);
}

#[tokio::test]
async fn list_dir_stops_at_first_level() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "A", "Name": "a", "DateModified": 1 }]),
        json!([{ "FileId": "F0", "Name": "top.txt", "Size": "3", "DateModified": "1" }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/folder/list.json/sid/A"))
        .respond_with(listing(json!([]), json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let fs = open(&server).await;
    let entries = fs.list_dir("").await.unwrap();

    assert_eq!(remotes(&entries), vec!["a/", "top.txt"]);
    server.verify().await;
}

#[tokio::test]
async fn list_depth_two_skips_grandchildren() {
    let server = MockServer::start().await;
    mount_tree(&server).await;

    let fs = open(&server).await;
    let entries = fs.list("", Some(2)).await.unwrap().collect().await.unwrap();

    assert_eq!(remotes(&entries), vec!["a/", "top.txt", "a/b/", "a/a1.txt"]);
}

#[tokio::test]
async fn zero_depth_listing_is_rejected() {
    let server = MockServer::start().await;
    mount_tree(&server).await;

    let fs = open(&server).await;
    let err = fs.list("", Some(0)).await.expect_err("expected zero depth error");

    assert!(matches!(err, FsError::ZeroDepth));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn pruned_folder_is_not_descended() {
    let server = MockServer::start().await;
    mount_tree(&server).await;

    let fs = open(&server).await;
    let mut lister = fs.list("", None).await.unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = lister.next().await.unwrap() {
        if entry.is_dir() && entry.remote() == "a" {
            lister.prune("a");
        }
        seen.push(entry.remote().to_string());
    }

    assert_eq!(seen, vec!["a", "top.txt"]);
}

#[tokio::test]
async fn listing_fills_the_directory_cache() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    Mock::given(method("GET"))
        .and(path("/folder/itembyname.json/sid/B"))
        .and(query_param("name", "b1\u{FF1F}.txt"))
        .respond_with(listing(
            json!([]),
            json!([{ "FileId": "F2", "Name": "b1\u{FF1F}.txt", "Size": 8, "DateModified": 1 }]),
        ))
        .mount(&server)
        .await;

    let fs = open(&server).await;
    fs.list("", None).await.unwrap().collect().await.unwrap();
    let listed = server.received_requests().await.unwrap().len();

    let object = fs.new_object("a/b/b1?.txt").await.unwrap();

    assert_eq!(object.id(), "F2");
    // Only the item lookup; the folders came from the cache.
    assert_eq!(server.received_requests().await.unwrap().len(), listed + 1);
}

#[tokio::test]
async fn list_of_missing_folder_fails() {
    let server = MockServer::start().await;
    mount_listing(&server, "0", json!([]), json!([])).await;

    let fs = open(&server).await;
    let err = fs.list("nope", None).await.expect_err("expected missing folder");

    assert!(matches!(err, FsError::DirectoryNotFound(_)));
}

#[tokio::test]
async fn rate_limited_listing_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/folder/list.json/sid/0"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_listing(
        &server,
        "0",
        json!([]),
        json!([{ "FileId": "F0", "Name": "top.txt", "Size": "3", "DateModified": "1" }]),
    )
    .await;

    let fs = open(&server).await;
    let entries = fs.list_dir("").await.unwrap();

    assert_eq!(remotes(&entries), vec!["top.txt"]);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn root_naming_a_file_is_reported() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "0",
        json!([{ "FolderID": "D", "Name": "docs", "DateModified": 1 }]),
        json!([]),
    )
    .await;
    mount_listing(
        &server,
        "D",
        json!([]),
        json!([{ "FileId": "F", "Name": "report.pdf", "Size": 1, "DateModified": 1 }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/folder/itembyname.json/sid/D"))
        .and(query_param("name", "report.pdf"))
        .respond_with(listing(
            json!([]),
            json!([{ "FileId": "F", "Name": "report.pdf", "Size": 1, "DateModified": 1 }]),
        ))
        .mount(&server)
        .await;

    let err = OpenDriveFs::with_session(
        config(&server).with_root("docs/report.pdf"),
        Session::new("sid"),
    )
    .await
    .expect_err("expected file root");

    match err {
        FsError::IsFile { parent_root, leaf } => {
            assert_eq!(parent_root, "docs");
            assert_eq!(leaf, "report.pdf");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_root_is_accepted_and_created_lazily() {
    let server = MockServer::start().await;
    mount_listing(&server, "0", json!([]), json!([])).await;
    Mock::given(method("GET"))
        .and(path("/folder/itembyname.json/sid/0"))
        .and(query_param("name", "backup"))
        .respond_with(listing(json!([]), json!([])))
        .expect(1)
        .mount(&server)
        .await;
    mount_create_folder(&server, "0", "backup", "BK").await;

    let fs = OpenDriveFs::with_session(config(&server).with_root("backup"), Session::new("sid"))
        .await
        .unwrap();
    fs.mkdir("").await.unwrap();

    assert_eq!(fs.root(), "backup");
    server.verify().await;
}
