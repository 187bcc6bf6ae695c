//! Integration tests for Slipway

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A slipway command confined to a scratch home directory
fn slipway(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("slipway");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("CI", "1")
        .env_remove("SLIPWAY_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Base catalog, package index and a WSGI project under `root`
fn project(root: &Path, base: &str) -> PathBuf {
    write(&root.join("bases/python/usr/bin/python3"), "#!runtime\n");
    write(
        &root.join("index/greeting/1.0.0/greeting/__init__.py"),
        "MESSAGE = 'hello from slipway'\n",
    );
    write(
        &root.join("index/greeting/1.1.0/greeting/__init__.py"),
        "MESSAGE = 'too new'\n",
    );

    let app = root.join("app");
    write(
        &app.join("app.py"),
        r#"from greeting import MESSAGE


def app(environ, start_response):
    body = MESSAGE.encode()
    start_response("200 OK", [("Content-Type", "text/plain"), ("Content-Length", str(len(body)))])
    return [body]
"#,
    );
    write(&app.join("requirements.txt"), "greeting==1.0\n");
    write(
        &app.join("slipway.toml"),
        &format!(
            r#"
[build]
base = "{base}"

[bases]
"python:3.12.4-slim" = "../bases/python"

[install]
index = "../index"

[launch]
entry_point = "app:app"
workers = 2
"#
        ),
    );
    app
}

mod cli_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layered image builds"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("slipway"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("slipway").and(predicate::str::contains("config.toml")));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[launch]"));
    }

    #[test]
    fn init_writes_project_config() {
        let home = TempDir::new().unwrap();
        let dir = home.path().join("project");
        slipway(home.path())
            .args(["init", "--path"])
            .arg(&dir)
            .assert()
            .success();
        assert!(dir.join("slipway.toml").is_file());

        slipway(home.path())
            .args(["init", "--path"])
            .arg(&dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn images_empty() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .args(["--no-local", "images"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No images found"));
    }

    #[test]
    fn launch_unknown_image() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .args(["--no-local", "launch", "nothing-here"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Image not found"));
    }
}

mod build_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn floating_base_fails_with_build_exit_code() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:latest");

        slipway(home.path())
            .arg("build")
            .arg(&app)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("not pinned"));
    }

    #[test]
    fn unsatisfiable_requirement_fails_with_build_exit_code() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");
        write(&app.join("requirements.txt"), "greeting>=2\n");

        slipway(home.path())
            .arg("build")
            .arg(&app)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("greeting"));

        slipway(home.path())
            .args(["--no-local", "images", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn rebuild_reuses_every_layer() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");

        let first = slipway(home.path())
            .arg("build")
            .arg(&app)
            .args(["--tag", "web"])
            .assert()
            .success();
        let first = String::from_utf8_lossy(&first.get_output().stdout).to_string();
        assert_eq!(first.matches("(built)").count(), 5, "{first}");

        let second = slipway(home.path())
            .arg("build")
            .arg(&app)
            .assert()
            .success();
        let second = String::from_utf8_lossy(&second.get_output().stdout).to_string();
        assert_eq!(second.matches("(cached)").count(), 5, "{second}");

        let images = slipway(home.path())
            .args(["--no-local", "images", "--format", "plain"])
            .assert()
            .success();
        let ids = String::from_utf8_lossy(&images.get_output().stdout).to_string();
        assert_eq!(ids.lines().count(), 1);
    }

    #[test]
    fn source_change_rebuilds_only_the_source_layer() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");

        slipway(home.path()).arg("build").arg(&app).assert().success();
        write(&app.join("views.py"), "ROUTES = []\n");

        let rebuilt = slipway(home.path())
            .arg("build")
            .arg(&app)
            .assert()
            .success();
        let out = String::from_utf8_lossy(&rebuilt.get_output().stdout).to_string();
        assert_eq!(out.matches("(cached)").count(), 4, "{out}");
        assert_eq!(out.matches("(built)").count(), 1, "{out}");
    }

    #[test]
    fn inspect_shows_supervise_entrypoint() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");

        slipway(home.path())
            .arg("build")
            .arg(&app)
            .args(["--tag", "web", "--workers", "3"])
            .assert()
            .success();

        slipway(home.path())
            .args(["--no-local", "inspect", "web", "--format", "json"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("\"supervise\"")
                    .and(predicate::str::contains("\"3\""))
                    .and(predicate::str::contains("install_dependencies"))
                    .and(predicate::str::contains("copy_source")),
            );
    }

    #[test]
    fn prune_and_clear_store() {
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");
        slipway(home.path()).arg("build").arg(&app).assert().success();

        slipway(home.path())
            .args(["--no-local", "cache", "prune"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No unreferenced layers"));

        slipway(home.path())
            .args(["--no-local", "cache", "clear", "--yes"])
            .assert()
            .success();

        slipway(home.path())
            .args(["--no-local", "cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No layers"));
    }
}

mod launch_tests {
    use super::*;
    use predicates::prelude::*;
    use serial_test::serial;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::process::{Child, Stdio};
    use std::time::{Duration, Instant};

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn spawn(home: &Path, args: &[&str], dir: &Path) -> Child {
        std::process::Command::new(env!("CARGO_BIN_EXE_slipway"))
            .args(args)
            .current_dir(dir)
            .env("HOME", home)
            .env("XDG_CONFIG_HOME", home.join("config"))
            .env("XDG_STATE_HOME", home.join("state"))
            .env("CI", "1")
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .unwrap()
    }

    fn get(port: u16) -> Option<String> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
        stream
            .write_all(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n")
            .ok()?;
        let mut response = String::new();
        stream.read_to_string(&mut response).ok()?;
        Some(response)
    }

    fn wait_for_response(port: u16) -> String {
        let deadline = Instant::now() + Duration::from_secs(15);
        while Instant::now() < deadline {
            if let Some(response) = get(port) {
                if response.starts_with("HTTP/") {
                    return response;
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("no HTTP response on port {port}");
    }

    fn stop(mut child: Child) -> std::process::ExitStatus {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            if let Some(status) = child.try_wait().unwrap() {
                return status;
            }
            if Instant::now() > deadline {
                child.kill().ok();
                panic!("supervisor did not stop");
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    #[test]
    #[serial]
    fn unresolvable_entry_point_exits_before_binding() {
        let home = TempDir::new().unwrap();
        let port = free_port();
        let bind = format!("127.0.0.1:{port}");

        slipway(home.path())
            .args(["--no-local", "supervise", "--bind", &bind, "missing_module:app"])
            .current_dir(home.path())
            .assert()
            .code(3)
            .stderr(predicate::str::contains("Entry point unresolvable"));

        assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn malformed_entry_point_exits_with_entry_point_code() {
        let home = TempDir::new().unwrap();
        slipway(home.path())
            .args(["--no-local", "supervise", "app"])
            .current_dir(home.path())
            .assert()
            .code(3);
    }

    #[test]
    #[serial]
    fn supervised_workers_serve_requests() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let home = TempDir::new().unwrap();
        let app = home.path().join("plain");
        write(
            &app.join("wsgi.py"),
            r#"def application(environ, start_response):
    start_response("200 OK", [("Content-Type", "text/plain")])
    return [b"plain wsgi"]
"#,
        );

        let port = free_port();
        let bind = format!("127.0.0.1:{port}");
        let child = spawn(
            home.path(),
            &["--no-local", "supervise", "--workers", "2", "--bind", &bind, "wsgi:application"],
            &app,
        );

        let response = wait_for_response(port);
        assert!(response.contains("200 OK"), "{response}");
        assert!(response.contains("plain wsgi"), "{response}");

        assert!(stop(child).success());
    }

    #[test]
    #[serial]
    fn built_image_launches_with_installed_dependencies() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let home = TempDir::new().unwrap();
        let app = project(home.path(), "python:3.12.4-slim");

        slipway(home.path())
            .arg("build")
            .arg(&app)
            .args(["--tag", "web"])
            .assert()
            .success();

        let port = free_port();
        let port_arg = port.to_string();
        let child = spawn(
            home.path(),
            &["--no-local", "launch", "web", "--bind", "127.0.0.1", "--port", &port_arg],
            home.path(),
        );

        let response = wait_for_response(port);
        assert!(response.contains("hello from slipway"), "{response}");

        assert!(stop(child).success());

        let runs = home.path().join("state").join("slipway").join("runs");
        let leftover = std::fs::read_dir(&runs)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0, "run directory was not removed");
    }
}
