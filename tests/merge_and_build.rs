//! Drives the mergebot binary against a local packaging repository.
//!
//! The bug tracker is a one-shot HTTP server replaying a recorded SOAP
//! answer. `debcheckout` and `gbp` are shell scripts on `PATH` that do the
//! minimum the real tools would: resolve, clone, release and tag.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

use assert_cmd::Command;
use tempfile::TempDir;

const SOAP_ANSWER: &str = include_str!("fixtures/bug.soap");
const SOAP_CONTENT_TYPE: &str = r#"multipart/related; type="text/xml"; start="<main_envelope>"; boundary="_----------=_146851316918670990""#;

const CHANGELOG: &str = "\
pkg (1.0) unstable; urgency=medium

  * Initial release.

 -- Test Case <test@case>  Sat, 16 Jul 2016 20:39:13 +0200
";

/// Serve one request with the recorded answer. Returns the endpoint URL.
fn serve_soap_answer() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/cgi-bin/soap.cgi", listener.local_addr().unwrap());

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse().unwrap();
            }
        }
        let mut request = vec![0; content_length];
        reader.read_exact(&mut request).unwrap();
        assert!(String::from_utf8_lossy(&request).contains("get_bug_log"));

        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: {SOAP_CONTENT_TYPE}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{SOAP_ANSWER}",
            SOAP_ANSWER.len()
        )
        .unwrap();
    });

    url
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = process::Command::new("git")
        .args(["-c", "user.name=Upstream", "-c", "user.email=upstream@example.org"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn have(program: &str) -> bool {
    process::Command::new(program)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A one-commit packaging repository tagged `debian/1.0`.
fn packaging_repository(root: &Path) -> PathBuf {
    let repo = root.join("pkg");
    fs::create_dir_all(repo.join("debian")).unwrap();
    fs::write(repo.join("README"), "hello\n").unwrap();
    fs::write(repo.join("debian/changelog"), CHANGELOG).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "Initial commit"]);
    git(&repo, &["tag", "debian/1.0"]);
    git(&repo, &["config", "--local", "receive.denyCurrentBranch", "updateInstead"]);
    repo
}

/// Stand-ins for `debcheckout` and `gbp` in a fresh `bin/` directory.
/// Returns the `PATH` to run mergebot with.
fn install_tools(root: &Path, scm: &str, repo: &Path) -> String {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let path = format!(
        "{}:{}",
        bin.display(),
        std::env::var("PATH").unwrap_or_default()
    );

    write_script(
        &bin.join("debcheckout"),
        &format!(
            "#!/bin/sh\nprintf '{scm}\\tfile://%s/.git\\n' '{}'\n",
            repo.display()
        ),
    );

    // Children only see the forwarded environment, so the script brings its own PATH.
    write_script(
        &bin.join("gbp"),
        &format!(
            r#"#!/bin/sh
set -e
export PATH='{path}'
case "$1" in
clone)
    git clone -q "$3" "$4"
    ;;
dch)
    {{
        printf 'pkg (1.1) unstable; urgency=medium\n\n'
        printf '  [ Test Case ]\n  * %s\n\n' "$(git log -1 --format=%s)"
        printf '  [ Nobody ]\n\n\n'
        printf ' -- Test Case <test@case>  Sun, 17 Jul 2016 10:00:00 +0200\n\n'
        cat debian/changelog
    }} > debian/changelog.new
    mv debian/changelog.new debian/changelog
    $VISUAL debian/changelog
    git commit -q -a -m "Update changelog for 1.1 release"
    ;;
buildpackage)
    mkdir -p ../export
    git tag debian/1.1
    ;;
*)
    echo "unexpected gbp invocation: $*" >&2
    exit 1
    ;;
esac
"#
        ),
    );

    path
}

fn mergebot(root: &Path, path: &str, soap_url: &str) -> Command {
    let home = root.join("home");
    let tmp = root.join("tmp");
    fs::create_dir_all(&home).unwrap();
    fs::create_dir_all(&tmp).unwrap();

    let mut command = Command::new(env!("CARGO_BIN_EXE_mergebot"));
    command
        .env_clear()
        .env("PATH", path)
        .env("HOME", &home)
        .env("TMPDIR", &tmp)
        .env("DEBFULLNAME", "Test Case")
        .env("DEBEMAIL", "test@case")
        .args(["--source_package", "pkg", "--bug", "#1", "--soap_url", soap_url]);
    command
}

#[test]
fn merges_patch_and_builds() {
    assert!(
        have("git") && have("patch"),
        "git and patch must be on PATH to merge and build"
    );
    let root = TempDir::new().unwrap();
    let repo = packaging_repository(root.path());
    let path = install_tools(root.path(), "git", &repo);
    let url = serve_soap_answer();

    let assert = mergebot(root.path(), &path, &url).assert().success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let work_dir = PathBuf::from(stdout.trim());
    assert!(work_dir.is_dir(), "temporary directory {work_dir:?} was removed");
    assert!(work_dir.starts_with(root.path().join("tmp")));

    let checkout = work_dir.join("repo");
    assert_eq!(
        git(&checkout, &["log", "--format=%an %ae %s", "HEAD~2.."]),
        "Test Case test@case Update changelog for 1.1 release\n\
         A a@b Fix for \"S\" (Closes: #1)\n"
    );
    assert_eq!(git(&checkout, &["tag"]), "debian/1.0\ndebian/1.1\n");
    assert_eq!(fs::read_to_string(checkout.join("README")).unwrap(), "hello, world\n");

    // A plain `git push` publishes every branch and tag.
    assert_eq!(
        git(&checkout, &["config", "--local", "--get-all", "remote.origin.push"]),
        "+refs/heads/*:refs/heads/*\n+refs/tags/*:refs/tags/*\n"
    );
    assert_eq!(
        git(&checkout, &["config", "--local", "--get", "push.default"]),
        "matching\n"
    );
    assert_eq!(
        git(&checkout, &["config", "--local", "--get", "user.name"]),
        "Test Case\n"
    );
    assert_eq!(
        git(&checkout, &["config", "--local", "--get", "user.email"]),
        "test@case\n"
    );
    git(&checkout, &["push", "-q"]);
    assert_eq!(
        git(&repo, &["log", "--format=%s", "HEAD~2.."]),
        "Update changelog for 1.1 release\nFix for \"S\" (Closes: #1)\n"
    );
    assert_eq!(git(&repo, &["tag"]), "debian/1.0\ndebian/1.1\n");

    let changelog = fs::read_to_string(checkout.join("debian/changelog")).unwrap();
    assert!(changelog.starts_with(
        "pkg (1.1) unstable; urgency=medium\n\n  [ Test Case ]\n  * Fix for \"S\" (Closes: #1)\n\n -- Test Case"
    ));
    assert!(!changelog.contains("[ Nobody ]"));
    assert!(changelog.ends_with(CHANGELOG));

    assert_eq!(
        fs::read(work_dir.join("latest.patch")).unwrap(),
        include_bytes!("fixtures/readme.patch")
    );
    assert!(work_dir.join("export").is_dir());

    let first = fs::read_to_string(work_dir.join("000-debcheckout.invocation.log")).unwrap();
    assert!(first.contains("\t\"--print\"\n\t\"pkg\"\n"));
    assert!(first.contains("\t\"DEBEMAIL=test@case\"\n"));
    assert!(!first.contains("PATH="));

    let last = fs::read_to_string(work_dir.join("011-gbp.invocation.log")).unwrap();
    assert!(last.contains("\t\"buildpackage\"\n"));
    assert!(last.contains("Execution finished: "));
    assert!(!last.contains("Still running"));
}

#[test]
fn unsupported_scm_keeps_work_dir() {
    let root = TempDir::new().unwrap();
    let repo = root.path().join("pkg");
    let path = install_tools(root.path(), "svn", &repo);
    let url = serve_soap_answer();

    let assert = mergebot(root.path(), &path, &url).assert().failure();

    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(
        stderr.contains("Error: resolving repository: mergebot only supports git currently"),
        "{stderr}"
    );

    let work_dirs: Vec<PathBuf> = fs::read_dir(root.path().join("tmp"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(work_dirs.len(), 1);
    assert!(work_dirs[0].join("latest.patch").is_file());
    assert!(work_dirs[0].join("000-debcheckout.stdoutstderr.log").is_file());
    assert!(!work_dirs[0].join("repo").exists());
}

#[test]
fn filter_changelog_mode() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("changelog");
    fs::write(
        &path,
        "pkg (1.1) unstable; urgency=medium\n\n  [ Nobody ]\n\n\n -- A <a@b>  date\n",
    )
    .unwrap();

    Command::new(env!("CARGO_BIN_EXE_mergebot"))
        .arg("--filter_changelog")
        .arg(&path)
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "pkg (1.1) unstable; urgency=medium\n\n -- A <a@b>  date\n"
    );
}
