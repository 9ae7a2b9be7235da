//! Copy integration tests.

use std::fs;
use std::path::Path;

use lodge_proto::ErrorCode;
use lodge_tests::TestService;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lodge_meta=debug")
        .with_test_writer()
        .try_init();
}

/// Returns every entry below `root` as (relative path, contents or None for dirs).
fn snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Option<Vec<u8>>)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
            if path.is_dir() {
                out.push((rel, None));
                walk(root, &path, out);
            } else {
                out.push((rel, Some(fs::read(&path).unwrap())));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

#[tokio::test]
async fn test_copy_tree_is_identical() {
    init_tracing();

    let service = TestService::new().unwrap();
    let token = service.token("hugo");
    service.executor.home(&service.ctx(), &token).await.unwrap();

    let src = service.physical("local/users/h/hugo/project");
    fs::create_dir_all(src.join("src/bin")).unwrap();
    fs::create_dir_all(src.join("empty")).unwrap();
    fs::write(src.join("Cargo.toml"), b"[package]\nname = \"x\"\n").unwrap();
    fs::write(src.join("src/lib.rs"), b"pub fn x() {}\n").unwrap();
    fs::write(src.join("src/bin/main.rs"), vec![7u8; 300_000]).unwrap();
    fs::write(src.join("empty.txt"), b"").unwrap();
    let before = snapshot(&src);

    service
        .executor
        .cp(
            &service.ctx(),
            &token,
            "local/users/h/hugo/project",
            "local/users/h/hugo/backup",
        )
        .await
        .unwrap();

    let dst = service.physical("local/users/h/hugo/backup");
    assert_eq!(snapshot(&dst), before);
    assert_eq!(snapshot(&src), before);

    let dirs = before.iter().filter(|(_, c)| c.is_none()).count();
    let files = before.len() - dirs;
    assert_eq!((files, dirs), (4, 3));
    assert!(service.backend.contains("local/users/h/hugo/backup"));
}

#[tokio::test]
async fn test_copy_file() {
    init_tracing();

    let service = TestService::new().unwrap();
    let token = service.token("hugo");
    service.executor.home(&service.ctx(), &token).await.unwrap();
    fs::write(service.physical("local/users/h/hugo/a.txt"), b"contents").unwrap();

    service
        .executor
        .cp(&service.ctx(), &token, "local/users/h/hugo/a.txt", "local/users/h/hugo/b.txt")
        .await
        .unwrap();

    assert_eq!(
        fs::read(service.physical("local/users/h/hugo/b.txt")).unwrap(),
        b"contents"
    );
    let meta = service
        .executor
        .stat(&service.ctx(), &token, "local/users/h/hugo/b.txt", false)
        .await
        .unwrap();
    assert_eq!(meta.size, 8);
    assert_eq!(meta.id, service.backend.record("local/users/h/hugo/b.txt").unwrap().id);
}

#[tokio::test]
async fn test_copy_never_overwrites() {
    init_tracing();

    let service = TestService::new().unwrap();
    let token = service.token("hugo");
    service.executor.home(&service.ctx(), &token).await.unwrap();
    fs::write(service.physical("local/users/h/hugo/a"), b"aaa").unwrap();
    fs::write(service.physical("local/users/h/hugo/b"), b"bbb").unwrap();

    let err = service
        .executor
        .cp(&service.ctx(), &token, "local/users/h/hugo/a", "local/users/h/hugo/b")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let err = service
        .executor
        .cp(&service.ctx(), &token, "local/users/h/hugo/a", "local/users/h/hugo/a")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    assert_eq!(fs::read(service.physical("local/users/h/hugo/a")).unwrap(), b"aaa");
    assert_eq!(fs::read(service.physical("local/users/h/hugo/b")).unwrap(), b"bbb");
}

#[tokio::test]
async fn test_copy_missing_source_not_found() {
    init_tracing();

    let service = TestService::new().unwrap();
    let token = service.token("hugo");
    service.executor.home(&service.ctx(), &token).await.unwrap();

    let err = service
        .executor
        .cp(&service.ctx(), &token, "local/users/h/hugo/none", "local/users/h/hugo/x")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(!service.physical("local/users/h/hugo/x").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_copy_does_not_follow_links_out_of_data_root() {
    init_tracing();

    let outside = tempfile::TempDir::new().unwrap();
    fs::write(outside.path().join("secret"), b"keep out").unwrap();

    let service = TestService::new().unwrap();
    let token = service.token("hugo");
    service.executor.home(&service.ctx(), &token).await.unwrap();

    let src = service.physical("local/users/h/hugo/project");
    fs::create_dir_all(src.join("docs")).unwrap();
    fs::write(src.join("docs/readme"), b"hi").unwrap();
    std::os::unix::fs::symlink(outside.path(), src.join("docs/escape")).unwrap();
    std::os::unix::fs::symlink(&src, src.join("docs/loop")).unwrap();
    std::os::unix::fs::symlink(outside.path().join("secret"), src.join("secret")).unwrap();

    service
        .executor
        .cp(
            &service.ctx(),
            &token,
            "local/users/h/hugo/project",
            "local/users/h/hugo/backup",
        )
        .await
        .unwrap();

    let dst = service.physical("local/users/h/hugo/backup");
    assert_eq!(
        snapshot(&dst),
        vec![
            ("docs".to_string(), None),
            ("docs/readme".to_string(), Some(b"hi".to_vec())),
        ]
    );

    let err = service
        .executor
        .cp(&service.ctx(), &token, "local/users/h/hugo/project/secret", "local/users/h/hugo/s")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    assert!(fs::symlink_metadata(service.physical("local/users/h/hugo/s")).is_err());
}
