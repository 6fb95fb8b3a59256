//! Script-driven coverage of the `shisho.*` namespaces: binary round trips,
//! temp-dir lifecycle, archive handling, XML selectors, URL helpers, and the
//! hook deadline.

mod common;

use common::{make_manager, manifest_with, register_enabled, write_plugin};
use shisho::config::HostConfig;
use shisho::plugins::{PluginManager, PluginService};
use std::time::Duration;

fn parser_manifest(id: &str) -> serde_json::Value {
    manifest_with(id, serde_json::json!({ "fileParser": { "types": ["testfmt"] } }))
}

async fn parse_title(manager: &PluginManager, root: &std::path::Path, file_type: &str) -> String {
    let input = root.join("x.testfmt");
    std::fs::write(&input, "input-bytes").unwrap();
    manager
        .run_file_parser("community", "p", &input, file_type)
        .await
        .unwrap()
        .title
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread")]
async fn fs_binary_round_trip_and_listing() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const bytes = shisho.fs.readFile(ctx.filePath);
  const dir = shisho.fs.tempDir();
  shisho.fs.mkdir(dir + "/nested");
  shisho.fs.writeFile(dir + "/nested/copy.bin", bytes);
  const entries = shisho.fs.listDir(dir);
  const copied = shisho.fs.readTextFile(dir + "/nested/copy.bin");
  const exists = shisho.fs.exists(dir + "/nested/copy.bin");
  return { title: copied + "|" + entries[0].name + "|" + entries[0].isDir + "|" + exists };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let title = parse_title(&manager, root.path(), "testfmt").await;
    assert_eq!(title, "input-bytes|nested|true|true");
}

#[tokio::test(flavor = "multi_thread")]
async fn temp_dir_is_removed_after_each_invocation() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const dir = shisho.fs.tempDir();
  shisho.fs.writeTextFile(dir + "/scratch.txt", "x");
  return { title: dir, publisher: shisho.fs.tempDir() };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let input = root.path().join("x.testfmt");
    std::fs::write(&input, "x").unwrap();
    let metadata = manager
        .run_file_parser("community", "p", &input, "testfmt")
        .await
        .unwrap();

    let temp_dir = metadata.title.unwrap();
    // stable within the invocation
    assert_eq!(temp_dir, metadata.publisher.unwrap());
    // removed once the hook returned
    assert!(!std::path::Path::new(&temp_dir).exists());

    // the next invocation gets a fresh directory
    let metadata = manager
        .run_file_parser("community", "p", &input, "testfmt")
        .await
        .unwrap();
    assert_ne!(metadata.title.unwrap(), temp_dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_namespace_round_trips_a_zip() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const dir = shisho.fs.tempDir();
  shisho.fs.mkdir(dir + "/src/sub");
  shisho.fs.writeTextFile(dir + "/src/a.txt", "alpha");
  shisho.fs.writeTextFile(dir + "/src/sub/b.txt", "beta");
  shisho.archive.createZip(dir + "/src", dir + "/out.zip");

  const names = shisho.archive.listZipEntries(dir + "/out.zip")
    .filter((e) => !e.isDir)
    .map((e) => e.name)
    .join(",");
  const entry = shisho.archive.readZipEntry(dir + "/out.zip", "sub/b.txt");
  shisho.archive.extractZip(dir + "/out.zip", dir + "/back");
  const beta = shisho.fs.readTextFile(dir + "/back/sub/b.txt");
  return { title: names + "|" + entry.byteLength + "|" + beta };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let title = parse_title(&manager, root.path(), "testfmt").await;
    assert_eq!(title, "a.txt,sub/b.txt|4|beta");
}

#[tokio::test(flavor = "multi_thread")]
async fn xml_namespace_parses_and_selects() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const doc = shisho.xml.parse(
    '<package xmlns:dc="http://purl.org/dc/elements/1.1/">' +
    '<metadata><dc:title>XML Title</dc:title>' +
    '<dc:creator role="aut">A. Author</dc:creator>' +
    '<item id="one"/><item id="two"/></metadata></package>'
  );
  const ns = { dc: "http://purl.org/dc/elements/1.1/" };
  const title = shisho.xml.querySelector(doc, "dc|title", ns);
  const items = shisho.xml.querySelectorAll(doc, "item");
  const missing = shisho.xml.querySelector(doc, "dc|missing", ns);
  return {
    title: title.text + "|" + items.length + "|" + items[1].attributes.id + "|" + (missing === null || missing === undefined)
  };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let title = parse_title(&manager, root.path(), "testfmt").await;
    assert_eq!(title, "XML Title|2|two|true");
}

#[tokio::test(flavor = "multi_thread")]
async fn url_namespace_encodes_and_sorts_params() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const qs = shisho.url.searchParams({ zebra: "z", alpha: "a b", mid: 7 });
  const enc = shisho.url.encodeURIComponent("a&b c");
  const dec = shisho.url.decodeURIComponent("x%20y");
  const parsed = shisho.url.parse("https://example.com:8443/path?q=1#frag");
  return { title: qs + "|" + enc + "|" + dec + "|" + parsed.host + ":" + parsed.port + parsed.path };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let title = parse_title(&manager, root.path(), "testfmt").await;
    assert_eq!(
        title,
        "alpha=a%20b&mid=7&zebra=z|a%26b%20c|x y|example.com:8443/path"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn parser_deadline_surfaces_timeout() {
    let root = tempfile::tempdir().unwrap();
    // spins well past the 1s parser deadline configured below
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const end = Date.now() + 5000;
  while (Date.now() < end) {}
  return { title: "too late" };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);

    let config = HostConfig {
        plugin_root: root.path().to_path_buf(),
        short_hook_timeout: Duration::from_secs(1),
        ..HostConfig::default()
    };
    let service = PluginService::open_in_memory().await.unwrap();
    let manager = PluginManager::new(config, service).unwrap();
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let input = root.path().join("x.testfmt");
    std::fs::write(&input, "x").unwrap();
    let err = manager
        .run_file_parser("community", "p", &input, "testfmt")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_namespace_runs_allowlisted_commands_only() {
    let root = tempfile::tempdir().unwrap();
    let manifest = manifest_with(
        "p",
        serde_json::json!({
            "fileParser": { "types": ["testfmt"] },
            "shellAccess": { "commands": ["echo"] },
        }),
    );
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const ok = shisho.shell.exec("echo", ["hello", "plugin"]);
  let denied = "no throw";
  try {
    shisho.shell.exec("rm", ["-rf", "/"]);
  } catch (e) {
    denied = e.message;
  }
  return { title: ok.exitCode + ":" + ok.stdout.trim() + "|" + denied };
} } };
"#;
    write_plugin(root.path(), "community", "p", &manifest, script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let title = parse_title(&manager, root.path(), "testfmt").await;
    let (echoed, denied) = title.split_once('|').unwrap();
    assert_eq!(echoed, "0:hello plugin");
    assert!(denied.starts_with("AccessDenied"), "got: {denied}");
}

#[tokio::test(flavor = "multi_thread")]
async fn cover_data_crosses_as_binary() {
    let root = tempfile::tempdir().unwrap();
    let script = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  const bytes = new Uint8Array([137, 80, 78, 71]);
  return { title: "with cover", coverData: bytes.buffer, coverMimeType: "image/png" };
} } };
"#;
    write_plugin(root.path(), "community", "p", &parser_manifest("p"), script);
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "p").await;
    manager.load_all().await.unwrap();

    let input = root.path().join("x.testfmt");
    std::fs::write(&input, "x").unwrap();
    let metadata = manager
        .run_file_parser("community", "p", &input, "testfmt")
        .await
        .unwrap();
    assert_eq!(metadata.cover_data.as_deref(), Some(&[137u8, 80, 78, 71][..]));
    assert_eq!(metadata.cover_mime_type.as_deref(), Some("image/png"));
}
