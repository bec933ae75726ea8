use super::*;

#[test]
fn test_protocol_transport_collapse() {
    assert_eq!(Protocol::Http.transport(), Protocol::Tcp);
    assert_eq!(Protocol::Https.transport(), Protocol::Tcp);
    assert_eq!(Protocol::Ssl.transport(), Protocol::Tcp);
    assert_eq!(Protocol::Udp.transport(), Protocol::Udp);
    assert!(Protocol::Https.is_tls());
    assert!(!Protocol::Http.is_tls());
}

#[test]
fn test_desired_replicas() {
    let svc = Service::new("worker").with_replicas(3);
    assert_eq!(svc.desired_replicas(Action::Update), 3);
    assert_eq!(svc.desired_replicas(Action::Destroy), 0);

    let retired = svc.with_action(Action::Destroy);
    assert_eq!(retired.desired_replicas(Action::Update), 0);
}

#[test]
fn test_tcp_listener_skips_udp() {
    let svc = Service::new("dns")
        .with_listener(53, Protocol::Udp)
        .with_listener(8053, Protocol::Http);
    assert_eq!(svc.tcp_listener().map(|l| l.port), Some(8053));

    let udp_only = Service::new("syslog").with_listener(514, Protocol::Udp);
    assert!(udp_only.tcp_listener().is_none());
}

#[test]
fn test_timeout_default() {
    let default = Duration::from_secs(600);
    let payload = DeployPayload::new(Action::Create, "p", "dev", "img");
    assert_eq!(payload.timeout_or(default), default);
    assert_eq!(payload.clone().with_timeout(0).timeout_or(default), default);
    assert_eq!(
        payload.with_timeout(60).timeout_or(default),
        Duration::from_secs(60)
    );
}

#[test]
fn test_status_keeps_services() {
    let cmd = DeployPayload::new(Action::Create, "p", "dev", "img")
        .with_service(Service::new("a"))
        .with_service(Service::new("b"));
    let report = cmd.status(State::Running, "in progress");
    assert_eq!(report.action, Action::Status);
    assert_eq!(report.state, State::Running);
    assert_eq!(report.services.len(), 2);
}

#[test]
fn test_status_drops_secret_values() {
    let cmd = DeployPayload::new(Action::Create, "p", "dev", "img")
        .with_secret(SecretEntry::new("TOKEN", "s3cret", SecretKind::Env));
    let report = cmd.status(State::Complete, "");
    assert!(report.secrets.is_empty());
    assert_eq!(cmd.secrets.len(), 1);
}

#[test]
fn test_state_terminal() {
    assert!(State::Complete.is_terminal());
    assert!(State::Deleted.is_terminal());
    assert!(State::Failed.is_terminal());
    assert!(!State::Running.is_terminal());
    assert!(!State::Waiting.is_terminal());
}

#[test]
fn test_expose_type_serialization() {
    let json = serde_json::to_string(&ExposeType::Office).unwrap();
    assert_eq!(json, "\"office\"");
    assert!(ExposeType::External.is_cloud());
    assert!(!ExposeType::Internal.is_cloud());
}
