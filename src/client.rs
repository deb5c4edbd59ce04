//! TFTP 클라이언트

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::Channel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stats::TransferStats;
use crate::storage::{FileStorage, Storage};
use crate::transfer::{Direction, Transfer};

/// 서버 하나에 대한 클라이언트
///
/// 전송마다 새 채널과 세션을 만듦
pub struct Client {
    server: SocketAddr,
    config: Config,
}

impl Client {
    pub fn new(server: SocketAddr, config: Config) -> Self {
        Self { server, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 원격 파일을 받아 `storage`에 기록
    pub async fn get(&self, remote: &str, storage: Box<dyn Storage>) -> Result<TransferStats> {
        self.transfer(Direction::Read, remote, storage).await
    }

    /// `storage` 내용을 원격 파일로 보냄
    pub async fn put(&self, remote: &str, storage: Box<dyn Storage>) -> Result<TransferStats> {
        self.transfer(Direction::Write, remote, storage).await
    }

    /// 원격 파일을 로컬 파일로 받기
    ///
    /// 실패하면 만들다 만 로컬 파일은 지움
    pub async fn get_file(&self, remote: &str, local: impl AsRef<Path>) -> Result<TransferStats> {
        let local = local.as_ref();
        let storage = FileStorage::create(local).map_err(Error::Storage)?;

        let result = self.get(remote, Box::new(storage)).await;
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(local) {
                debug!("부분 파일 삭제 실패 {}: {}", local.display(), e);
            }
        }
        result
    }

    /// 로컬 파일을 원격 파일로 보내기
    pub async fn put_file(&self, local: impl AsRef<Path>, remote: &str) -> Result<TransferStats> {
        let storage = FileStorage::open(local).map_err(Error::Storage)?;
        self.put(remote, Box::new(storage)).await
    }

    async fn transfer(
        &self,
        direction: Direction,
        remote: &str,
        storage: Box<dyn Storage>,
    ) -> Result<TransferStats> {
        let channel = Arc::new(Channel::connect(self.server).await?);
        let transfer = Transfer::client(direction, &self.config, remote, storage)?;

        info!(
            "{:?} {} ({}) via {}",
            direction,
            remote,
            self.config.mode.as_str(),
            self.server
        );

        Session::new(transfer, channel, self.config.max_retries)
            .run()
            .await
    }
}
