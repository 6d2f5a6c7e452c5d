//! Apply-flow sequencing tests against a recording command runner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use moor_config::{resolve, AccessMode, IngressMode, RawSpec};
use moor_deploy::{
    CommandOutput, CommandRequest, CommandRunner, DeployError, Executor, PortProber, Result,
    Stage,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingRunner {
    commands: RefCell<Vec<String>>,
    /// Labels that should fail, with how many times.
    failures: RefCell<HashMap<String, u32>>,
    /// 1-based invocation numbers that should fail, per label.
    fail_on: RefCell<HashMap<String, Vec<u32>>>,
    calls: RefCell<HashMap<String, u32>>,
}

impl RecordingRunner {
    fn fail(&self, label: &str, times: u32) {
        self.failures.borrow_mut().insert(label.to_owned(), times);
    }

    fn fail_nth(&self, label: &str, nth: u32) {
        self.fail_on.borrow_mut().entry(label.to_owned()).or_default().push(nth);
    }

    fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        self.commands.borrow_mut().push(request.command.clone());
        let call = {
            let mut calls = self.calls.borrow_mut();
            let counter = calls.entry(request.label.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let mut fail = false;
        if let Some(remaining) = self.failures.borrow_mut().get_mut(&request.label) {
            if *remaining > 0 {
                *remaining -= 1;
                fail = true;
            }
        }
        if self.fail_on.borrow().get(&request.label).is_some_and(|n| n.contains(&call)) {
            fail = true;
        }
        if fail {
            return Err(DeployError::CommandFailed {
                command: request.label.clone(),
                status: "exit code 1".to_owned(),
                detail: "injected".to_owned(),
            });
        }
        Ok(CommandOutput::default())
    }
}

struct NoSleep;

impl moor_deploy::Sleeper for NoSleep {
    fn sleep(&self, _: std::time::Duration) {}
}

struct AllFree;

impl PortProber for AllFree {
    fn probe(&self, _bind: &str, _port: u16) -> std::result::Result<(), String> {
        Ok(())
    }
}

struct Harness {
    _source: TempDir,
    state: TempDir,
    nginx: TempDir,
    spec: moor_config::DeploySpec,
}

fn harness(configure: impl FnOnce(&mut RawSpec)) -> Harness {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("Dockerfile"), "FROM alpine\n").unwrap();
    let state = tempfile::tempdir().unwrap();
    let nginx = tempfile::tempdir().unwrap();
    let mut raw = RawSpec {
        service_name: "demo".to_owned(),
        source_dir: source.path().to_path_buf(),
        base_dir: state.path().to_path_buf(),
        host_port: Some(8080),
        container_port: Some(8000),
        ..RawSpec::default()
    };
    configure(&mut raw);
    let spec = resolve(raw).unwrap();
    Harness { _source: source, state, nginx, spec }
}

fn executor<'a>(h: &'a Harness, runner: &'a RecordingRunner) -> Executor<'a> {
    static NO_SLEEP: NoSleep = NoSleep;
    static ALL_FREE: AllFree = AllFree;
    Executor::new(&h.spec, runner)
        .with_sleeper(&NO_SLEEP)
        .with_prober(&ALL_FREE)
        .with_env(HashMap::new())
        .with_nginx_root(h.nginx.path())
}

fn position(commands: &[String], needle: &str) -> usize {
    commands
        .iter()
        .position(|c| c.contains(needle))
        .unwrap_or_else(|| panic!("no command containing {needle:?} in {commands:#?}"))
}

#[test]
fn plain_deploy_runs_compose_up_only() {
    let h = harness(|_| {});
    let runner = RecordingRunner::default();
    let report = executor(&h, &runner).apply().unwrap();

    let commands = runner.commands();
    assert_eq!(commands.len(), 1, "{commands:#?}");
    assert!(commands[0].contains("docker compose -p demo"));
    assert!(commands[0].contains("up -d --build --remove-orphans"));
    assert_eq!(*report.stages.last().unwrap(), Stage::Done);
    assert!(!report.stages.contains(&Stage::Certificate));
    assert_eq!(report.endpoints, ["http://127.0.0.1:8080/"]);

    // The summary points at the same compose project the deploy used.
    assert!(report.followups.iter().any(|c| c.contains("docker compose -p demo") && c.ends_with(" ps")));
    assert!(report.followups.iter().any(|c| c.contains("logs -f")));
    assert!(!report.followups.iter().any(|c| c.contains("renew")));
}

#[test]
fn artifacts_land_in_the_state_dir_before_any_command() {
    let h = harness(|raw| {
        raw.auth_token = Some("secret-token.01".to_owned());
    });
    let runner = RecordingRunner::default();
    let report = executor(&h, &runner).apply().unwrap();

    let state_root = h.state.path().join("demo");
    assert!(state_root.join("docker-compose.generated.yml").is_file());
    assert!(state_root.join("docker-compose.proxy.yml").is_file());
    let conf = std::fs::read_to_string(state_root.join("nginx/default.conf")).unwrap();
    assert!(conf.contains("Bearer secret-token.01"));
    assert!(report.artifacts.iter().any(|p| p.ends_with("default.conf")));
}

#[test]
fn tls_deploy_orders_bootstrap_certificate_finalize() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.domain = Some("app.example.com".to_owned());
        raw.acme_email = Some("ops@example.com".to_owned());
    });
    let runner = RecordingRunner::default();
    let report = executor(&h, &runner).apply().unwrap();

    let commands = runner.commands();
    let up = position(&commands, "up -d --build");
    let certbot = position(&commands, "certonly --webroot");
    let reload = position(&commands, "nginx -s reload");
    assert!(up < certbot, "{commands:#?}");
    assert!(certbot < reload, "{commands:#?}");
    assert!(commands[certbot].contains("run --rm moor-certbot"));
    assert!(commands[certbot].contains("-d app.example.com"));

    // The conf on disk ends up in the issued phase.
    let conf =
        std::fs::read_to_string(h.state.path().join("demo/nginx/default.conf")).unwrap();
    assert!(conf.contains("listen 443 ssl;"));
    assert!(conf.contains("return 301 https://$host$request_uri;"));
    assert_eq!(
        report.stages,
        [
            Stage::Validate,
            Stage::Ports,
            Stage::Artifacts,
            Stage::Workload,
            Stage::Certificate,
            Stage::FinalizeIngress,
            Stage::Done
        ]
    );
    assert_eq!(report.endpoints, ["https://app.example.com/"]);
    assert!(report
        .followups
        .iter()
        .any(|c| c.contains("run --rm moor-certbot renew")));
}

#[test]
fn certificate_hosts_without_routes_still_get_a_server_block() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.domain = Some("api.example.com".to_owned());
        raw.acme_email = Some("ops@example.com".to_owned());
        raw.proxy_routes = Some(vec!["wiki.example.com=demo:8000".to_owned()]);
    });
    let runner = RecordingRunner::default();
    executor(&h, &runner).apply().unwrap();

    let conf =
        std::fs::read_to_string(h.state.path().join("demo/nginx/default.conf")).unwrap();
    assert!(conf.contains("server_name api.example.com;"), "{conf}");
    assert!(conf.contains("server_name wiki.example.com;"));
    assert!(conf.contains("return 404;"), "routeless cert host answers 404");
}

#[test]
fn registry_failures_are_retried_then_surface() {
    let h = harness(|raw| {
        raw.registry_retries = 3;
        raw.retry_backoff_seconds = 1;
    });
    let runner = RecordingRunner::default();
    runner.fail("compose up", 2);
    executor(&h, &runner).apply().unwrap();
    assert_eq!(runner.commands().len(), 3, "two failures then success");

    let runner = RecordingRunner::default();
    runner.fail("compose up", 99);
    let err = executor(&h, &runner).apply().unwrap_err();
    assert!(matches!(err, DeployError::RetriesExhausted { attempts: 3, .. }));
}

#[test]
fn external_ingress_enables_the_site_after_nginx_test() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.ingress_mode = IngressMode::External;
        raw.auth_token = Some("secret-token.01".to_owned());
    });
    let runner = RecordingRunner::default();
    executor(&h, &runner).apply().unwrap();

    let commands = runner.commands();
    let test = position(&commands, "nginx -t");
    let reload = position(&commands, "systemctl reload nginx");
    assert!(test < reload, "{commands:#?}");

    let available = h.nginx.path().join("sites-available/moor_demo.conf");
    let enabled = h.nginx.path().join("sites-enabled/moor_demo.conf");
    assert!(available.is_file());
    let target = std::fs::read_link(&enabled).unwrap();
    assert_eq!(target, available);
    let conf = std::fs::read_to_string(&available).unwrap();
    assert!(conf.contains("proxy_pass http://127.0.0.1:8080;"));
}

#[test]
fn rejected_nginx_config_disables_the_site_again() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.ingress_mode = IngressMode::External;
        raw.auth_token = Some("secret-token.01".to_owned());
    });
    let runner = RecordingRunner::default();
    runner.fail("nginx -t", 99);
    let err = executor(&h, &runner).apply().unwrap_err();
    assert!(matches!(err, DeployError::NginxConfigRejected { .. }));
    assert!(!h.nginx.path().join("sites-enabled/moor_demo.conf").exists());
}

#[test]
fn host_ingress_tls_revalidates_before_the_final_reload() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.ingress_mode = IngressMode::External;
        raw.domain = Some("app.example.com".to_owned());
        raw.acme_email = Some("ops@example.com".to_owned());
    });
    let runner = RecordingRunner::default();
    let report = executor(&h, &runner).apply().unwrap();

    let commands = runner.commands();
    assert_eq!(commands.iter().filter(|c| *c == "nginx -t").count(), 2);
    let certbot = position(&commands, "certbot certonly");
    assert!(!commands[certbot].contains("docker compose"), "host certbot binary");
    let second_test =
        commands.iter().rposition(|c| c == "nginx -t").unwrap();
    let last_reload =
        commands.iter().rposition(|c| c == "systemctl reload nginx").unwrap();
    assert!(second_test < last_reload, "{commands:#?}");

    let conf = std::fs::read_to_string(h.nginx.path().join("sites-available/moor_demo.conf"))
        .unwrap();
    assert!(conf.contains("ssl_certificate"));
    assert!(report.followups.iter().any(|c| c.starts_with("certbot renew")));
}

#[test]
fn rejected_final_config_restores_the_bootstrap_site() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.ingress_mode = IngressMode::External;
        raw.domain = Some("app.example.com".to_owned());
        raw.acme_email = Some("ops@example.com".to_owned());
    });
    let runner = RecordingRunner::default();
    runner.fail_nth("nginx -t", 2);
    let err = executor(&h, &runner).apply().unwrap_err();
    assert!(matches!(err, DeployError::NginxConfigRejected { .. }));

    // The enabled site still points at content that passed validation.
    let enabled = h.nginx.path().join("sites-enabled/moor_demo.conf");
    assert!(enabled.exists());
    let conf = std::fs::read_to_string(h.nginx.path().join("sites-available/moor_demo.conf"))
        .unwrap();
    assert!(!conf.contains("ssl_certificate"), "{conf}");
    assert!(conf.contains("acme-challenge"), "issuance stays reachable for a retry");
}

#[test]
fn takeover_stops_nginx_before_the_workload_and_restarts_it() {
    let h = harness(|raw| {
        raw.access_mode = AccessMode::Public;
        raw.ingress_mode = IngressMode::Takeover;
        raw.auth_token = Some("secret-token.01".to_owned());
    });
    let runner = RecordingRunner::default();
    executor(&h, &runner).apply().unwrap();

    let commands = runner.commands();
    let stop = position(&commands, "systemctl stop nginx");
    let up = position(&commands, "up -d --build");
    let start = position(&commands, "systemctl start nginx");
    assert!(stop < up && up < start, "{commands:#?}");
}

#[test]
fn port_conflicts_stop_the_deploy_before_any_command() {
    struct AllBusy;
    impl PortProber for AllBusy {
        fn probe(&self, _bind: &str, _port: u16) -> std::result::Result<(), String> {
            Err("address already in use".to_owned())
        }
    }

    let h = harness(|_| {});
    let runner = RecordingRunner::default();
    static NO_SLEEP: NoSleep = NoSleep;
    let err = Executor::new(&h.spec, &runner)
        .with_sleeper(&NO_SLEEP)
        .with_prober(&AllBusy)
        .with_env(HashMap::new())
        .apply()
        .unwrap_err();

    assert!(matches!(err, DeployError::PortConflict { port: 8080, .. }));
    assert!(runner.commands().is_empty());
}

#[test]
fn unset_compose_variables_fail_preflight() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(
        source.path().join("docker-compose.yml"),
        "services:\n  api:\n    image: x:${TAG}\n    ports:\n      - \"8080:8000\"\n",
    )
    .unwrap();
    let state = tempfile::tempdir().unwrap();
    let raw = RawSpec {
        service_name: "demo".to_owned(),
        source_dir: source.path().to_path_buf(),
        base_dir: state.path().to_path_buf(),
        ..RawSpec::default()
    };
    let spec = resolve(raw).unwrap();

    let runner = RecordingRunner::default();
    let err = Executor::new(&spec, &runner)
        .with_env(HashMap::new())
        .apply()
        .unwrap_err();
    match err {
        DeployError::Preflight(message) => assert!(message.contains("TAG"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(runner.commands().is_empty());

    // Supplying the variable clears the guard.
    let env: HashMap<String, String> = [("TAG".to_owned(), "1.0".to_owned())].into();
    let all_free = AllFree;
    Executor::new(&spec, &runner)
        .with_env(env)
        .with_prober(&all_free)
        .apply()
        .unwrap();

    assert!(Path::new(&state.path().join("demo")).is_dir());
}
