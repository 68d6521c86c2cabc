//! CliPackageClient against a scripted process runner.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use packager_client::{ClientApi, ClientError, CliPackageClient, PackageClient};
use packager_core::{
    MemorySink, OutputSink, PackageReference, ProcessError, ProcessOutput, ProcessRunner, Secret,
    ShellCommand,
};

/// Replies to commands whose display text contains a key. For V1 queries the
/// reply body is written to the `--json` path instead of stdout.
#[derive(Default)]
struct ScriptedRunner {
    replies: Vec<(&'static str, i32, &'static str)>,
    calls: Mutex<Vec<ShellCommand>>,
}

impl ScriptedRunner {
    fn reply(mut self, key: &'static str, exit_code: i32, body: &'static str) -> Self {
        self.replies.push((key, exit_code, body));
        self
    }

    fn calls(&self) -> Vec<ShellCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &ShellCommand,
        _sink: &dyn OutputSink,
    ) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());
        let display = command.display();
        let (exit_code, body) = self
            .replies
            .iter()
            .find(|(key, _, _)| display.contains(key))
            .map(|(_, code, body)| (*code, *body))
            .unwrap_or((0, ""));

        let json_path = command
            .args
            .iter()
            .position(|a| a == "--json")
            .and_then(|i| command.args.get(i + 1));
        let stdout = match json_path {
            Some(path) => {
                std::fs::write(path, body)?;
                String::new()
            }
            None => body.to_string(),
        };
        Ok(ProcessOutput {
            exit_code,
            stdout,
            tail: Vec::new(),
        })
    }
}

fn client(runner: Arc<ScriptedRunner>, api: ClientApi) -> (CliPackageClient, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (CliPackageClient::new(runner, sink.clone(), api), sink)
}

#[tokio::test]
async fn test_detect_picks_api_from_version() {
    let runner = Arc::new(ScriptedRunner::default().reply("--version", 0, "Conan version 1.59.0\n"));
    let client = CliPackageClient::detect(runner, Arc::new(MemorySink::new()))
        .await
        .unwrap();
    assert_eq!(client.api(), ClientApi::V1);
}

#[tokio::test]
async fn test_remove_without_matches_skips_remove_command() {
    let runner = Arc::new(
        ScriptedRunner::default().reply("list", 0, r#"{"upload_repo": {"error": "not found"}}"#),
    );
    let (client, _) = client(runner.clone(), ClientApi::V2);

    for _ in 0..2 {
        let removed = client.remove("zlib/1.2.11*", "upload_repo").await.unwrap();
        assert!(removed.is_empty());
    }
    assert!(runner.calls().iter().all(|c| c.args[0] != "remove"));
}

#[tokio::test]
async fn test_v1_remove_existing_recipe() {
    let runner = Arc::new(ScriptedRunner::default().reply(
        "search",
        0,
        r#"{"error": false, "results": [{"remote": "upload_repo",
            "items": [{"recipe": {"id": "zlib/1.2.11@lasote/mychannel"}}]}]}"#,
    ));
    let (client, sink) = client(runner.clone(), ClientApi::V1);

    let removed = client.remove("zlib/1.2.11*", "upload_repo").await.unwrap();
    assert_eq!(removed, vec!["zlib/1.2.11@lasote/mychannel".to_string()]);
    assert!(sink.contains(">> conan remove zlib/1.2.11* -r upload_repo -f"));
}

#[tokio::test]
async fn test_password_goes_through_environment() {
    let runner = Arc::new(ScriptedRunner::default());
    let (client, sink) = client(runner.clone(), ClientApi::V2);

    client
        .authenticate("upload_repo", "lasote", &Secret::new("s3cr3t"))
        .await
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls[0].args, vec!["remote", "login", "upload_repo", "lasote"]);
    assert!(calls[0]
        .env
        .contains(&("CONAN_PASSWORD".to_string(), "s3cr3t".to_string())));
    assert!(!sink.contains("s3cr3t"));
}

#[tokio::test]
async fn test_failed_login_maps_to_authentication_error() {
    let runner = Arc::new(ScriptedRunner::default().reply("user", 1, ""));
    let (client, _) = client(runner, ClientApi::V1);
    let err = client
        .authenticate("upload_repo", "lasote", &Secret::new("bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_v2_upload_retries() {
    let runner = Arc::new(ScriptedRunner::default().reply("upload", 1, ""));
    let (client, _) = client(runner.clone(), ClientApi::V2);
    let reference: PackageReference = "zlib/1.2.11@lasote/testing".parse().unwrap();

    let err = client
        .upload(&reference, Some("abc"), "upload_repo", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CommandFailed { exit_code: 1, .. }));
    assert_eq!(runner.calls().len(), 3);
}

#[tokio::test]
async fn test_v2_search_packages() {
    let runner = Arc::new(ScriptedRunner::default().reply(
        "list",
        0,
        r#"{"upload_repo": {"zlib/1.2.11@lasote/testing": {"revisions": {"r1": {
            "packages": {"p1": {"info": {"settings": {"arch": "x86"}}},
                         "p2": {"info": {"settings": {"arch": "x86_64"}}}}}}}}}"#,
    ));
    let (client, _) = client(runner.clone(), ClientApi::V2);
    let reference: PackageReference = "zlib/1.2.11@lasote/testing".parse().unwrap();

    let packages = client.search_packages(&reference, "upload_repo").await.unwrap();
    assert_eq!(packages.len(), 2);
    assert_eq!(
        runner.calls()[0].args,
        vec![
            "list",
            "zlib/1.2.11@lasote/testing:*",
            "-r",
            "upload_repo",
            "--format=json"
        ]
    );
}
