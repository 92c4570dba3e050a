//! Renders a `supervisor.ini` for one version directory (§6).

use crate::topology::NodeRef;
use std::fmt::Write as _;

pub struct ProgramSpec {
    pub name: String,
    pub command: String,
    pub directory: String,
    pub stdout_logfile: String,
    pub stderr_logfile: String,
    pub replica_set: Option<String>,
}

pub fn render(control_port: u16, programs: &[ProgramSpec]) -> String {
    let mut out = String::new();
    writeln!(out, "[supervisord]").unwrap();
    writeln!(out, "nodaemon=false").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "[inet_http_server]").unwrap();
    writeln!(out, "port=127.0.0.1:{control_port}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "[include]").unwrap();
    writeln!(out, "files = programs/*.ini").unwrap();
    writeln!(out).unwrap();

    for program in programs {
        if let Some(rs) = &program.replica_set {
            writeln!(out, "; Replica Set: {rs}").unwrap();
        }
        writeln!(out, "[program:{}]", program.name).unwrap();
        writeln!(out, "command={}", program.command).unwrap();
        writeln!(out, "directory={}", program.directory).unwrap();
        writeln!(out, "autostart=false").unwrap();
        writeln!(out, "autorestart=unexpected").unwrap();
        writeln!(out, "startsecs=5").unwrap();
        writeln!(out, "startretries=3").unwrap();
        writeln!(out, "stdout_logfile={}", program.stdout_logfile).unwrap();
        writeln!(out, "stderr_logfile={}", program.stderr_logfile).unwrap();
        writeln!(out, "stopwaitsecs=30").unwrap();
        writeln!(out, "stopsignal=INT").unwrap();
        writeln!(out, "environment=HOME=\"%(ENV_HOME)s\",USER=\"%(ENV_USER)s\"").unwrap();
        writeln!(out).unwrap();
    }
    out
}

pub fn program_name_for(node: &NodeRef, is_mongos: bool) -> String {
    if is_mongos {
        format!("mongos-{}", node.port)
    } else {
        format!("mongod-{}", node.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_control_port_and_program_sections() {
        let programs = vec![ProgramSpec {
            name: "mongod-27017".into(),
            command: "/clusters/c0/v7.0/bin/mongod --config /clusters/c0/v7.0/mongod-27017/config/mongod.conf".into(),
            directory: "/clusters/c0/v7.0".into(),
            stdout_logfile: "/clusters/c0/v7.0/mongod-27017/log/stdout.log".into(),
            stderr_logfile: "/clusters/c0/v7.0/mongod-27017/log/stderr.log".into(),
            replica_set: Some("rs0".into()),
        }];
        let rendered = render(19123, &programs);
        assert!(rendered.contains("port=127.0.0.1:19123"));
        assert!(rendered.contains("[program:mongod-27017]"));
        assert!(rendered.contains("; Replica Set: rs0"));
        assert!(rendered.contains("autostart=false"));
    }

    #[test]
    fn program_name_distinguishes_mongos_from_mongod() {
        let node = NodeRef::new("localhost", 27019);
        assert_eq!(program_name_for(&node, true), "mongos-27019");
        assert_eq!(program_name_for(&node, false), "mongod-27019");
    }
}
