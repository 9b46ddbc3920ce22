use crate::config::Config;
use crate::database::{Database, DbError};
use crate::modules::pickems::database::PickemsHandler;

pub struct Databases {
    pub pickems: PickemsHandler,
}

impl Databases {
    pub async fn open(config: &Config) -> Result<Self, DbError> {
        Ok(Self {
            pickems: Database::open(&config.data_path).await?,
        })
    }
}
