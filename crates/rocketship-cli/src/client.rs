// gRPC client wrapper - same role as everruns-cli's HTTP Client, just built
// on tonic's generated stub instead of reqwest since the engine speaks gRPC.

use rocketship_engine::proto;
use rocketship_engine::EngineClient;
use thiserror::Error;
use tonic::transport::Channel;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("{0}")]
    Rpc(#[from] tonic::Status),

    #[error("run not found")]
    NotFound,
}

pub struct Client {
    inner: EngineClient<Channel>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let endpoint = if addr.starts_with("http") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let inner = EngineClient::connect(endpoint).await?;
        Ok(Self { inner })
    }

    pub async fn create_run(
        &mut self,
        yaml_payload: String,
        context: proto::RunContext,
    ) -> Result<String, ClientError> {
        let response = self
            .inner
            .create_run(proto::CreateRunRequest {
                yaml_payload,
                context: Some(context),
            })
            .await?;
        Ok(response.into_inner().run_id)
    }

    pub async fn stream_logs(
        &mut self,
        run_id: String,
    ) -> Result<tonic::Streaming<proto::LogLine>, ClientError> {
        let response = self
            .inner
            .stream_logs(proto::StreamLogsRequest { run_id })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn get_run(&mut self, run_id: String) -> Result<proto::RunDetails, ClientError> {
        self.inner
            .get_run(proto::GetRunRequest { run_id })
            .await
            .map(|r| r.into_inner())
            .map_err(|status| {
                if status.code() == tonic::Code::NotFound {
                    ClientError::NotFound
                } else {
                    ClientError::Rpc(status)
                }
            })
    }

    pub async fn list_runs(
        &mut self,
        request: proto::ListRunsRequest,
    ) -> Result<proto::ListRunsResponse, ClientError> {
        Ok(self.inner.list_runs(request).await?.into_inner())
    }

    pub async fn cancel_run(&mut self, run_id: String) -> Result<proto::CancelRunResponse, ClientError> {
        Ok(self
            .inner
            .cancel_run(proto::CancelRunRequest { run_id })
            .await?
            .into_inner())
    }

    pub async fn health(&mut self) -> Result<proto::HealthResponse, ClientError> {
        Ok(self.inner.health(proto::HealthRequest {}).await?.into_inner())
    }
}
