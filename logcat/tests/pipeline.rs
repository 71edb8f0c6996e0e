use logcat::collector::LogFormat;
use logcat::output_writer::{RotatingWriter, FILE_PREFIX};
use logcat::pipeline::{Pipeline, PipelineSettings};
use logcat::tailer::{FileTailer, TailerConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DOCKER_LINE: &str = "2023-06-15T12:34:56.789Z|abcdefgh12345678|1.2.3.4|user|GET|/api/docker/registry-docker-remote/v2/alpine/curl/manifests/latest|200|-1|1234|567|user-agent123";
const DOCKER_RECORD: &str = r#"{"billing_timestamp":"2023-06-15 12:00:00.000","server_name":"artifactory.domain","service":"artifactory","action":"download","ip":"1.2.3.4","repository":"registry-docker-remote","project":"default","artifactory_path":"alpine/curl/manifests/latest","user_name":"user","consumption_unit":"bytes","quantity":1234}"#;

fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

fn output_lines(dir: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(FILE_PREFIX), "unexpected file {name}");
        let content = std::fs::read_to_string(&path).unwrap();
        lines.extend(content.lines().map(str::to_string));
    }
    lines
}

async fn wait_for_records(dir: &Path, expected: usize) {
    for _ in 0..200 {
        if output_lines(dir).len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {expected} records");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tailed_log_becomes_billing_records() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let log_path = input_dir.path().join("artifactory-request.log");
    append(&log_path, &format!("{DOCKER_LINE}\n"));

    let mut tailer = FileTailer::start(
        &log_path,
        TailerConfig {
            poll_interval: Duration::from_millis(10),
            start_at_end: false,
        },
    )
    .await
    .unwrap();

    let settings = PipelineSettings {
        format: LogFormat::new("|", 11),
        workers: 3,
        work_queue_capacity: 8,
        output_queue_capacity: 8,
        server_identity: "artifactory.domain".to_string(),
    };
    let pipeline = Pipeline::start(settings, RotatingWriter::new(output_dir.path()))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { pipeline.run(&mut tailer, shutdown).await }
    });

    // Appended after startup: a failed request, a malformed line, a generic remote and a
    // partial line that is completed later.
    append(
        &log_path,
        &[
            DOCKER_LINE.replace("|200|", "|404|"),
            "not|a|request".to_string(),
            "2023-06-15T13:00:00.000Z|trace|5.6.7.8|alice|GET|/generic-remote/tools/cli.tar.gz|200|-1|42|1|curl".to_string(),
            String::new(),
        ]
        .join("\n"),
    );
    append(&log_path, &DOCKER_LINE[..40]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&log_path, &format!("{}\n", &DOCKER_LINE[40..]));

    wait_for_records(output_dir.path(), 3).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.lines_received, 5);
    assert_eq!(summary.shape_mismatches, 1);
    assert_eq!(summary.workers.not_billable, 1);
    assert_eq!(summary.writer.records_written, 3);
    assert_eq!(summary.writer.files_opened, 1);

    let mut lines = output_lines(output_dir.path());
    lines.sort();
    let generic = r#"{"billing_timestamp":"2023-06-15 13:00:00.000","server_name":"artifactory.domain","service":"artifactory","action":"download","ip":"5.6.7.8","repository":"generic-remote","project":"default","artifactory_path":"tools/cli.tar.gz","user_name":"alice","consumption_unit":"bytes","quantity":42}"#;
    let mut expected = vec![
        DOCKER_RECORD.to_string(),
        DOCKER_RECORD.to_string(),
        generic.to_string(),
    ];
    expected.sort();
    assert_eq!(lines, expected);
}

#[tokio::test]
async fn deleted_output_file_is_replaced() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let log_path = input_dir.path().join("artifactory-request.log");
    append(&log_path, "");

    let mut tailer = FileTailer::start(
        &log_path,
        TailerConfig {
            poll_interval: Duration::from_millis(10),
            start_at_end: true,
        },
    )
    .await
    .unwrap();
    let settings = PipelineSettings {
        format: LogFormat::new("|", 11),
        workers: 1,
        work_queue_capacity: 4,
        output_queue_capacity: 4,
        server_identity: "artifactory.domain".to_string(),
    };
    let pipeline = Pipeline::start(settings, RotatingWriter::new(output_dir.path()))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { pipeline.run(&mut tailer, shutdown).await }
    });

    append(&log_path, &format!("{DOCKER_LINE}\n"));
    wait_for_records(output_dir.path(), 1).await;

    for entry in std::fs::read_dir(output_dir.path()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    append(&log_path, &format!("{DOCKER_LINE}\n"));
    wait_for_records(output_dir.path(), 1).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.writer.files_opened, 2);
    assert_eq!(output_lines(output_dir.path()), vec![DOCKER_RECORD.to_string()]);
}
