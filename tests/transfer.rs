// ABOUTME: Integration tests for recursive uploads and downloads.
// ABOUTME: Runs transfers against a directory-backed RemoteFs, directly and through the orchestrator.

mod support;

use herd::transfer::{Direction, ProgressObserver, Transfer, TransferPlan};
use herd::types::HostName;
use parking_lot::Mutex;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use support::local_fs::LocalDirFs;

#[derive(Default)]
struct Recorder {
    finished: Mutex<Vec<(String, u64)>>,
}

impl ProgressObserver for Recorder {
    fn started(&self, _host: &HostName, _path: &str, _size: u64) {}

    fn advanced(&self, _host: &HostName, _path: &str, _transferred: u64) {}

    fn finished(&self, _host: &HostName, path: &str, transferred: u64) {
        self.finished.lock().push((path.to_string(), transferred));
    }
}

fn host() -> HostName {
    HostName::new("web1").unwrap()
}

fn upload(sources: &[&PathBuf], destination: &str, preserve: bool) -> TransferPlan {
    TransferPlan {
        direction: Direction::Upload,
        sources: sources.iter().map(|p| p.display().to_string()).collect(),
        destination: destination.to_string(),
        preserve,
    }
}

fn download(sources: &[&str], preserve: bool) -> TransferPlan {
    TransferPlan {
        direction: Direction::Download,
        sources: sources.iter().map(|s| s.to_string()).collect(),
        destination: String::new(),
        preserve,
    }
}

mod put {
    use super::*;

    #[tokio::test]
    async fn single_file_to_exact_path() {
        support::init_tracing();
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let source = local.path().join("app.conf");
        fs::write(&source, "listen 80\n").unwrap();
        fs::create_dir(remote.path().join("etc")).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let recorder = Arc::new(Recorder::default());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: recorder.clone(),
        };

        let report = transfer.put(&upload(&[&source], "/etc/site.conf", false)).await;

        assert!(report.is_success());
        assert_eq!(report.bytes(), 10);
        assert_eq!(
            fs::read_to_string(remote.path().join("etc/site.conf")).unwrap(),
            "listen 80\n"
        );
        assert_eq!(
            *recorder.finished.lock(),
            vec![("/etc/site.conf".to_string(), 10)]
        );
    }

    #[tokio::test]
    async fn trailing_slash_creates_directory() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let a = local.path().join("a.txt");
        let b = local.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "bb").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&a, &b], "/srv/drop/", false)).await;

        assert!(report.is_success());
        assert_eq!(report.total(), 2);
        assert_eq!(fs::read_to_string(remote.path().join("srv/drop/a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(remote.path().join("srv/drop/b.txt")).unwrap(), "bb");
    }

    #[tokio::test]
    async fn directory_uploads_recursively() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let tree = local.path().join("site");
        fs::create_dir_all(tree.join("static/css")).unwrap();
        fs::write(tree.join("index.html"), "<html>").unwrap();
        fs::write(tree.join("static/css/main.css"), "body{}").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&tree], "/var/www/", false)).await;

        assert!(report.is_success());
        assert_eq!(
            fs::read_to_string(remote.path().join("var/www/site/index.html")).unwrap(),
            "<html>"
        );
        assert_eq!(
            fs::read_to_string(remote.path().join("var/www/site/static/css/main.css")).unwrap(),
            "body{}"
        );
    }

    #[tokio::test]
    async fn preserve_copies_permission_bits() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let script = local.path().join("deploy.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&script], "/bin/", true)).await;

        assert!(report.is_success());
        let mode = fs::metadata(remote.path().join("bin/deploy.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o750);
    }

    #[tokio::test]
    async fn missing_source_fails_alone() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let present = local.path().join("present.txt");
        let missing = local.path().join("missing.txt");
        fs::write(&present, "here").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&missing, &present], "/in/", false)).await;

        assert_eq!(report.total(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        assert!(remote.path().join("in/present.txt").exists());
    }
}

mod get {
    use super::*;

    #[tokio::test]
    async fn directory_downloads_recursively() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::create_dir_all(remote.path().join("etc/nginx/conf.d")).unwrap();
        fs::write(remote.path().join("etc/nginx/nginx.conf"), "worker_processes 1;").unwrap();
        fs::write(remote.path().join("etc/nginx/conf.d/site.conf"), "server {}").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let dest = local.path().join("backup");
        let report = transfer.get(&download(&["/etc/nginx/"], false), &dest).await;

        assert!(report.is_success());
        assert_eq!(
            fs::read_to_string(dest.join("nginx/nginx.conf")).unwrap(),
            "worker_processes 1;"
        );
        assert_eq!(
            fs::read_to_string(dest.join("nginx/conf.d/site.conf")).unwrap(),
            "server {}"
        );
    }

    #[tokio::test]
    async fn missing_remote_path_is_reported() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::write(remote.path().join("hosts"), "127.0.0.1 localhost").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer
            .get(&download(&["/hosts", "/nope"], false), local.path())
            .await;

        assert_eq!(report.failed(), 1);
        let failed = report.entries.iter().find(|e| e.result.is_err()).unwrap();
        assert_eq!(failed.path, "/nope");
        assert!(local.path().join("hosts").exists());
    }
}

mod across_hosts {
    use super::*;
    use herd::orchestrator::{LocalIo, Operation, Orchestrator, Stage};
    use herd::output::{MultiplexerConfig, WriteMode};
    use support::mock_session::{MockConnector, Script, SharedBuffer};
    use tokio::sync::watch;

    fn serving(root: &Path) -> Script {
        Script {
            fs_root: Some(root.to_path_buf()),
            ..Script::default()
        }
    }

    fn local_io() -> LocalIo {
        LocalIo {
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
            stdin: Box::new(&b""[..]),
            stdin_is_tty: false,
            terminal_size: None,
            resize: None,
        }
    }

    fn hosts(names: &[&str]) -> Vec<HostName> {
        names.iter().map(|n| HostName::new(n).unwrap()).collect()
    }

    #[tokio::test]
    async fn downloads_land_in_per_host_directories() {
        support::init_tracing();
        let web1 = tempfile::tempdir().unwrap();
        let web2 = tempfile::tempdir().unwrap();
        fs::write(web1.path().join("motd"), "one").unwrap();
        fs::write(web2.path().join("motd"), "two").unwrap();
        let dest = tempfile::tempdir().unwrap();

        let connector = MockConnector::new()
            .host("web1", serving(web1.path()))
            .host("web2", serving(web2.path()));
        let (_cancel_tx, cancel) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            Arc::new(connector),
            MultiplexerConfig::new("${SERVER} ", WriteMode::Lines),
            cancel,
        );

        let plan = TransferPlan {
            destination: dest.path().display().to_string(),
            ..download(&["/motd"], false)
        };
        let result = orchestrator
            .run(&hosts(&["web1", "web2"]), Operation::Transfer(plan), local_io())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(fs::read_to_string(dest.path().join("web1/motd")).unwrap(), "one");
        assert_eq!(fs::read_to_string(dest.path().join("web2/motd")).unwrap(), "two");
    }

    #[tokio::test]
    async fn failed_paths_fail_the_host_but_keep_the_report() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let present = local.path().join("present.txt");
        fs::write(&present, "data").unwrap();
        let missing = local.path().join("missing.txt");

        let connector = MockConnector::new().host("web1", serving(remote.path()));
        let (_cancel_tx, cancel) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            Arc::new(connector),
            MultiplexerConfig::new("${SERVER} ", WriteMode::Lines),
            cancel,
        );

        let result = orchestrator
            .run(
                &hosts(&["web1"]),
                Operation::Transfer(upload(&[&present, &missing], "/up/", false)),
                local_io(),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code(), 1);
        let outcome = &result.outcomes[0];
        assert_eq!(outcome.error.as_ref().unwrap().stage(), Stage::Transfer);
        let report = outcome.transfer.as_ref().unwrap();
        assert_eq!((report.total(), report.failed()), (2, 1));
    }

    #[tokio::test]
    async fn missing_sftp_subsystem_is_a_transfer_failure() {
        let connector = MockConnector::new().host("web1", Script::default());
        let (_cancel_tx, cancel) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            Arc::new(connector),
            MultiplexerConfig::new("${SERVER} ", WriteMode::Lines),
            cancel,
        );

        let result = orchestrator
            .run(
                &hosts(&["web1"]),
                Operation::Transfer(download(&["/etc/hosts"], false)),
                local_io(),
            )
            .await
            .unwrap();

        let outcome = &result.outcomes[0];
        assert_eq!(outcome.error.as_ref().unwrap().stage(), Stage::Transfer);
        assert!(outcome.transfer.is_none());
    }
}

mod links {
    use super::*;
    use std::os::unix::fs::symlink;

    #[tokio::test]
    async fn upload_skips_links_inside_a_tree() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let tree = local.path().join("site");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("index.html"), "<h1>hi</h1>").unwrap();
        symlink(&tree, tree.join("loop")).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&tree], "/srv/", false)).await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.total(), 1);
        assert!(remote.path().join("srv/site/index.html").is_file());
        assert!(!remote.path().join("srv/site/loop").exists());
    }

    #[tokio::test]
    async fn named_link_source_is_followed() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let target = local.path().join("real.conf");
        fs::write(&target, "x=1").unwrap();
        let link = local.path().join("current.conf");
        symlink(&target, &link).unwrap();
        fs::create_dir(remote.path().join("etc")).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let report = transfer.put(&upload(&[&link], "/etc/app.conf", false)).await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(
            fs::read_to_string(remote.path().join("etc/app.conf")).unwrap(),
            "x=1"
        );
    }

    #[tokio::test]
    async fn download_skips_remote_links_inside_a_tree() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let tree = remote.path().join("var/www");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("index.html"), "<h1>hi</h1>").unwrap();
        symlink(&tree, tree.join("loop")).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        let host = host();
        let transfer = Transfer {
            fs: &fs_,
            host: &host,
            observer: Arc::new(Recorder::default()),
        };

        let dest = local.path().join("out");
        let report = transfer.get(&download(&["/var/www"], false), &dest).await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.total(), 1);
        assert_eq!(fs::read_to_string(dest.join("www/index.html")).unwrap(), "<h1>hi</h1>");
        assert!(!dest.join("www/loop").exists());
    }
}
