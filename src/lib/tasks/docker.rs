use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
        StartContainerOptions,
    },
    image::CreateImageOptions,
    models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::types::{Config, DockerAction, DockerError, DockerResult};

/// Container lifecycle operations the worker needs. Implementations report
/// facts through [`DockerResult`] and never touch task state.
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    /// Pull, create and start a container for `config`.
    async fn run(&self, config: &Config) -> DockerResult;

    /// Stop and remove `container_id`.
    async fn stop(&self, container_id: &str) -> DockerResult;
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

impl DockerClient {
    pub fn new() -> Result<Self, DockerError> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(DockerClient { client })
    }

    async fn pull(&self, image: &str) -> Result<(), DockerError> {
        let mut stream = std::pin::pin!(self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        ));

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(image, %status, "pull progress");
            }
        }
        Ok(())
    }

    /// Copy what the container has written so far to our own stdout/stderr.
    async fn stream_logs(&self, container_id: &str) -> Result<(), DockerError> {
        let mut logs = std::pin::pin!(self.client.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        ));

        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    write_chunk(&mut stdout, &message).await?;
                }
                LogOutput::StdErr { message } => {
                    write_chunk(&mut stderr, &message).await?;
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(())
    }
}

async fn write_chunk<W>(out: &mut W, bytes: &[u8]) -> Result<(), DockerError>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(bytes)
        .await
        .map_err(|e| DockerError::ClientError(format!("writing container output: {e}")))?;
    out.flush()
        .await
        .map_err(|e| DockerError::ClientError(format!("writing container output: {e}")))
}

pub fn restart_policy(name: &str) -> RestartPolicyNameEnum {
    match name {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    }
}

pub fn container_config(config: &Config) -> ContainerConfig<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = config
        .port_bindings
        .iter()
        .map(|(container_port, host_port)| {
            (
                port_key(container_port),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                }]),
            )
        })
        .collect();

    let host_config = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(restart_policy(&config.restart_policy)),
            maximum_retry_count: None,
        }),
        memory: (config.memory > 0).then_some(config.memory),
        nano_cpus: (config.cpu > 0.0).then(|| (config.cpu * 1_000_000_000.0) as i64),
        publish_all_ports: Some(true),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        ..Default::default()
    };

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = config
        .exposed_ports
        .iter()
        .map(|port| (format!("{port}/tcp"), HashMap::new()))
        .collect();
    for container_port in config.port_bindings.keys() {
        exposed_ports.entry(port_key(container_port)).or_default();
    }

    ContainerConfig {
        image: Some(config.image.clone()),
        env: Some(config.env.clone()),
        cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
        attach_stdin: Some(config.attach_stdin),
        attach_stdout: Some(config.attach_stdout),
        attach_stderr: Some(config.attach_stderr),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn port_key(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}

#[async_trait]
impl Runtime for DockerClient {
    async fn run(&self, config: &Config) -> DockerResult {
        info!(image = %config.image, "pulling image");
        if let Err(e) = self.pull(&config.image).await {
            error!(image = %config.image, error = %e, "error pulling image");
            return DockerResult::failed(DockerAction::Pull, e);
        }

        let options = (!config.name.is_empty()).then(|| CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        });

        let container_id = match self
            .client
            .create_container(options, container_config(config))
            .await
        {
            Ok(resp) => resp.id,
            Err(e) => {
                error!(name = %config.name, error = %e, "error creating container");
                return DockerResult::failed(DockerAction::Create, e);
            }
        };

        if let Err(e) = self
            .client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            error!(name = %config.name, %container_id, error = %e, "error starting container");
            return DockerResult::failed(DockerAction::Start, e).with_container(container_id);
        }

        info!(name = %config.name, %container_id, "container started");

        if let Err(e) = self.stream_logs(&container_id).await {
            warn!(%container_id, error = %e, "could not copy container output");
        }

        DockerResult::success(container_id, DockerAction::Start)
    }

    async fn stop(&self, container_id: &str) -> DockerResult {
        info!(container_id, "stopping container");
        if let Err(e) = self.client.stop_container(container_id, None).await {
            error!(container_id, error = %e, "error stopping container");
            return DockerResult::failed(DockerAction::Stop, e).with_container(container_id);
        }

        if let Err(e) = self.client.remove_container(container_id, None).await {
            error!(container_id, error = %e, "error removing container");
            return DockerResult::failed(DockerAction::Remove, e).with_container(container_id);
        }

        info!(container_id, "container stopped and removed");
        DockerResult::success(container_id.to_string(), DockerAction::Remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_policy_falls_back_to_no() {
        assert_eq!(restart_policy("always"), RestartPolicyNameEnum::ALWAYS);
        assert_eq!(
            restart_policy("unless-stopped"),
            RestartPolicyNameEnum::UNLESS_STOPPED
        );
        assert_eq!(restart_policy("on-failure"), RestartPolicyNameEnum::ON_FAILURE);
        assert_eq!(restart_policy(""), RestartPolicyNameEnum::NO);
        assert_eq!(restart_policy("sometimes"), RestartPolicyNameEnum::NO);
    }

    #[test]
    fn container_config_publishes_ports() {
        let config = Config {
            image: "nginx:latest".into(),
            memory: 128,
            cpu: 0.25,
            exposed_ports: vec![80],
            port_bindings: HashMap::from([("443".to_string(), "8443".to_string())]),
            restart_policy: "always".into(),
            ..Default::default()
        };

        let cc = container_config(&config);
        let exposed = cc.exposed_ports.unwrap();
        assert!(exposed.contains_key("80/tcp"));
        assert!(exposed.contains_key("443/tcp"));

        let host = cc.host_config.unwrap();
        assert_eq!(host.publish_all_ports, Some(true));
        assert_eq!(host.memory, Some(128));
        assert_eq!(host.nano_cpus, Some(250_000_000));
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["443/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8443"));
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::ALWAYS)
        );
    }

    #[test]
    fn container_config_omits_unset_limits() {
        let cc = container_config(&Config {
            image: "alpine".into(),
            ..Default::default()
        });
        let host = cc.host_config.unwrap();
        assert_eq!(host.memory, None);
        assert_eq!(host.nano_cpus, None);
        assert_eq!(host.port_bindings, None);
        assert_eq!(cc.cmd, None);
    }
}
