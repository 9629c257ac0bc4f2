//! Tests for the downloader module.

#[cfg(test)]
mod tests {
    use crate::catalog::{ArchiveDescriptor, ArchiveFormat};
    use crate::downloader::http::user_agent;
    use crate::downloader::{BinaryProvisioner, FreshnessRecord, MetadataStore, ProvisionOutcome};
    use crate::error::LauncherError;
    use crate::platform::PlatformId;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCRIPT: &str = "#!/bin/sh\necho jabls\n";

    fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(
                    *name,
                    zip::write::SimpleFileOptions::default().unix_permissions(0o644),
                )
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn descriptor(server: &MockServer, format: ArchiveFormat) -> ArchiveDescriptor {
        ArchiveDescriptor {
            platform: PlatformId::LinuxX64,
            download_url: format!("{}/jabls-portable.{}", server.uri(), format.extension()),
            archive_format: format,
            relative_working_dir: PathBuf::from("jabls").join("bin"),
            executable_name: "jabls".to_string(),
        }
    }

    fn provisioner(scratch: &TempDir) -> BinaryProvisioner {
        BinaryProvisioner::new(
            scratch.path().join("server-bin"),
            scratch.path().join("jabls-download-meta.json"),
        )
        .unwrap()
    }

    async fn mount_head(server: &MockServer, route: &str, last_modified: &str) {
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).insert_header("last-modified", last_modified))
            .mount(server)
            .await;
    }

    async fn mount_get(server: &MockServer, route: &str, body: Vec<u8>, expected: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_run_downloads_and_records_marker() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            tar_gz(&[("jabls/bin/jabls", SCRIPT), ("jabls/lib/server.jar", "jar")]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);
        let d = descriptor(&server, ArchiveFormat::TarGz);

        let outcome = provisioner.ensure_latest(&d).await.unwrap();
        assert_eq!(
            outcome,
            ProvisionOutcome::Downloaded {
                last_modified: Some("2024-01-01".to_string())
            }
        );

        let executable = d.executable_path(provisioner.tree_root());
        assert_eq!(std::fs::read_to_string(&executable).unwrap(), SCRIPT);
        assert!(provisioner.tree_root().join("jabls/lib/server.jar").exists());
        assert!(!provisioner.tree_root().join("jabls-portable.tar.gz").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&executable).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let stored = MetadataStore::new(provisioner.metadata_path()).read().await;
        assert_eq!(stored, Some(FreshnessRecord::new("2024-01-01")));
    }

    #[tokio::test]
    async fn test_matching_marker_skips_download() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            tar_gz(&[("jabls/bin/jabls", SCRIPT)]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);
        let d = descriptor(&server, ArchiveFormat::TarGz);

        assert!(provisioner.ensure_latest(&d).await.unwrap().downloaded());
        assert_eq!(
            provisioner.ensure_latest(&d).await.unwrap(),
            ProvisionOutcome::UpToDate
        );
    }

    #[tokio::test]
    async fn test_changed_marker_replaces_tree() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-02-01").await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            tar_gz(&[("jabls/bin/jabls", SCRIPT)]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);
        let d = descriptor(&server, ArchiveFormat::TarGz);

        MetadataStore::new(provisioner.metadata_path())
            .write(&FreshnessRecord::new("2024-01-01"))
            .await
            .unwrap();
        let stale = provisioner.tree_root().join("jabls/lib/old.jar");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        assert!(provisioner.ensure_latest(&d).await.unwrap().downloaded());
        assert!(!stale.exists());
        assert_eq!(
            MetadataStore::new(provisioner.metadata_path()).read().await,
            Some(FreshnessRecord::new("2024-02-01"))
        );
    }

    #[tokio::test]
    async fn test_missing_remote_marker_keeps_existing_install() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/jabls-portable.tar.gz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        mount_get(&server, "/jabls-portable.tar.gz", Vec::new(), 0).await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);
        MetadataStore::new(provisioner.metadata_path())
            .write(&FreshnessRecord::new("2024-01-01"))
            .await
            .unwrap();

        let outcome = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::UpToDate);
        // Root directory is recreated even when the tree was removed externally
        assert!(provisioner.tree_root().is_dir());
    }

    #[tokio::test]
    async fn test_zip_archive() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.zip", "2024-01-01").await;
        mount_get(
            &server,
            "/jabls-portable.zip",
            zip_archive(&[("jabls/bin/jabls", SCRIPT)]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);
        let d = descriptor(&server, ArchiveFormat::Zip);

        assert!(provisioner.ensure_latest(&d).await.unwrap().downloaded());
        assert_eq!(
            std::fs::read_to_string(d.executable_path(provisioner.tree_root())).unwrap(),
            SCRIPT
        );
        assert!(!provisioner.tree_root().join("jabls-portable.zip").exists());
    }

    #[tokio::test]
    async fn test_error_status_aborts_without_metadata() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        Mock::given(method("GET"))
            .and(path("/jabls-portable.tar.gz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        let err = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Download { .. }), "{err}");
        assert!(err.to_string().contains("404"));
        assert_eq!(
            MetadataStore::new(provisioner.metadata_path()).read().await,
            None
        );
    }

    #[tokio::test]
    async fn test_corrupt_archive_aborts_without_metadata() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            b"definitely not gzip".to_vec(),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        let err = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Extraction { .. }), "{err}");
        assert!(!provisioner.tree_root().join("jabls-portable.tar.gz").exists());
        assert_eq!(
            MetadataStore::new(provisioner.metadata_path()).read().await,
            None
        );
    }

    #[tokio::test]
    async fn test_archive_without_executable_is_rejected() {
        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            tar_gz(&[("jabls/README", "no binary here")]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        let err = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Extraction { .. }), "{err}");
        assert_eq!(
            MetadataStore::new(provisioner.metadata_path()).read().await,
            None
        );
    }

    #[tokio::test]
    async fn test_escaping_symlink_fails_strict_extraction() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_link_name("../../../etc/passwd").unwrap();
        builder
            .append_data(&mut header, "jabls/bin/jabls", std::io::empty())
            .unwrap();
        let body = builder.into_inner().unwrap().finish().unwrap();

        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(&server, "/jabls-portable.tar.gz", body, 1).await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        let err = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Extraction { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_chain_cannot_write_outside_tree() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "d/", std::io::empty()).unwrap();

        // Each link on its own stays inside the tree; chained they do not
        for name in ["d/up", "d/up/esc"] {
            let mut link = tar::Header::new_gnu();
            link.set_entry_type(tar::EntryType::Symlink);
            link.set_size(0);
            link.set_mode(0o777);
            link.set_link_name("..").unwrap();
            builder.append_data(&mut link, name, std::io::empty()).unwrap();
        }

        let mut file = tar::Header::new_gnu();
        file.set_entry_type(tar::EntryType::Regular);
        file.set_size(5);
        file.set_mode(0o644);
        builder
            .append_data(&mut file, "d/up/esc/escaped.txt", &b"owned"[..])
            .unwrap();
        let body = builder.into_inner().unwrap().finish().unwrap();

        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(&server, "/jabls-portable.tar.gz", body, 1).await;

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        let err = provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Extraction { .. }), "{err}");
        assert!(!scratch.path().join("escaped.txt").exists());
        assert!(!scratch.path().parent().unwrap().join("escaped.txt").exists());
        assert_eq!(
            MetadataStore::new(provisioner.metadata_path()).read().await,
            None
        );
    }

    #[tokio::test]
    async fn test_unreachable_metadata_endpoint() {
        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch);

        // Reserve a port, then free it so nothing is listening
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let d = ArchiveDescriptor {
            platform: PlatformId::LinuxX64,
            download_url: format!("http://127.0.0.1:{}/jabls-portable.tar.gz", port),
            archive_format: ArchiveFormat::TarGz,
            relative_working_dir: PathBuf::from("jabls/bin"),
            executable_name: "jabls".to_string(),
        };

        let err = provisioner.ensure_latest(&d).await.unwrap_err();
        assert!(matches!(err, LauncherError::Provisioning { .. }), "{err}");
        assert!(!provisioner.tree_root().exists());
    }

    #[tokio::test]
    async fn test_requests_identify_launcher_version() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/jabls-portable.tar.gz"))
            .and(header("user-agent", user_agent().as_str()))
            .respond_with(ResponseTemplate::new(200).insert_header("last-modified", "2024-01-01"))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(
            &server,
            "/jabls-portable.tar.gz",
            tar_gz(&[("jabls/bin/jabls", SCRIPT)]),
            1,
        )
        .await;

        let scratch = TempDir::new().unwrap();
        provisioner(&scratch)
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap();
        assert_eq!(user_agent(), format!("jabls-launcher/{}", crate::CURRENT_VERSION));
    }

    #[tokio::test]
    async fn test_progress_reported() {
        let body = tar_gz(&[("jabls/bin/jabls", SCRIPT)]);
        let size = body.len() as u64;

        let server = MockServer::start().await;
        mount_head(&server, "/jabls-portable.tar.gz", "2024-01-01").await;
        mount_get(&server, "/jabls-portable.tar.gz", body, 1).await;

        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = seen.clone();

        let scratch = TempDir::new().unwrap();
        let provisioner = provisioner(&scratch).with_progress(Box::new(move |done, _total| {
            seen_cb.store(done, Ordering::SeqCst);
        }));

        provisioner
            .ensure_latest(&descriptor(&server, ArchiveFormat::TarGz))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), size);
    }
}
