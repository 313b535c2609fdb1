//! Data-catalog registration. The lake writer talks to this trait; the AWS
//! implementation registers Glue databases, tables and partitions.
//! "Already exists" is success everywhere: registration is idempotent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_glue::types::{Column, DatabaseInput, PartitionInput, SerDeInfo, StorageDescriptor, TableInput};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn ensure_database(&self) -> Result<()>;
    async fn create_table(&self, log_type: &str) -> Result<()>;
    async fn add_partition(&self, log_type: &str, year: i32, month: u32, day: u32, hour: u32)
        -> Result<()>;
}

/// `AWS.CloudTrail` → `aws_cloudtrail`; the lake path and the catalog table
/// share this mapping.
pub fn table_name(log_type: &str) -> String {
    log_type.to_lowercase().replace('.', "_")
}

pub struct GlueCatalog {
    client: aws_sdk_glue::Client,
    database: String,
    bucket: String,
}

const INPUT_FORMAT: &str = "org.apache.hadoop.mapred.TextInputFormat";
const OUTPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat";
const SERDE_LIBRARY: &str = "org.openx.data.jsonserde.JsonSerDe";

impl GlueCatalog {
    pub fn new(client: aws_sdk_glue::Client, database: &str, bucket: &str) -> Self {
        GlueCatalog {
            client,
            database: database.to_owned(),
            bucket: bucket.to_owned(),
        }
    }

    fn serde_info() -> SerDeInfo {
        SerDeInfo::builder()
            .serialization_library(SERDE_LIBRARY)
            .build()
    }

    fn base_columns() -> Vec<Column> {
        let col = |name: &str, column_type: &str| {
            Column::builder()
                .name(name)
                .r#type(column_type)
                .build()
                .expect("column name set")
        };
        vec![
            col("eventversion", "string"),
            col(
                "useridentity",
                "struct<type:string,principalid:string,arn:string,accountid:string>",
            ),
            col("eventtime", "timestamp"),
            col("eventsource", "string"),
            col("eventname", "string"),
            col("awsregion", "string"),
            col("sourceipaddress", "string"),
            col("useragent", "string"),
            col("errorcode", "string"),
            col("errormessage", "string"),
            col("requestparameters", "map<string,string>"),
            col("responseelements", "map<string,string>"),
            col("requestid", "string"),
            col("eventid", "string"),
            col("eventtype", "string"),
            col("recipientaccountid", "string"),
            col("resources", "array<struct<arn:string,accountid:string,type:string>>"),
        ]
    }

    fn partition_keys() -> Vec<Column> {
        ["year", "month", "day", "hour"]
            .iter()
            .map(|name| {
                Column::builder()
                    .name(*name)
                    .r#type("int")
                    .build()
                    .expect("column name set")
            })
            .collect()
    }

    fn is_already_exists(err: &aws_sdk_glue::Error) -> bool {
        matches!(err, aws_sdk_glue::Error::AlreadyExistsException(_))
    }
}

#[async_trait]
impl Catalog for GlueCatalog {
    async fn ensure_database(&self) -> Result<()> {
        let result = self
            .client
            .create_database()
            .database_input(
                DatabaseInput::builder()
                    .name(&self.database)
                    .description("cloudsift data lake database")
                    .build()
                    .context("build database input")?,
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = aws_sdk_glue::Error::from(err);
                if Self::is_already_exists(&err) {
                    Ok(())
                } else {
                    Err(err).context("create database")
                }
            }
        }
    }

    async fn create_table(&self, log_type: &str) -> Result<()> {
        let table = table_name(log_type);
        let location = format!("s3://{}/logs/{}/", self.bucket, table);

        let storage = StorageDescriptor::builder()
            .location(location)
            .input_format(INPUT_FORMAT)
            .output_format(OUTPUT_FORMAT)
            .serde_info(Self::serde_info())
            .set_columns(Some(Self::base_columns()))
            .build();

        let result = self
            .client
            .create_table()
            .database_name(&self.database)
            .table_input(
                TableInput::builder()
                    .name(&table)
                    .description(format!("cloudsift table for {} logs", log_type))
                    .table_type("EXTERNAL_TABLE")
                    .storage_descriptor(storage)
                    .set_partition_keys(Some(Self::partition_keys()))
                    .parameters("classification", "json")
                    .parameters("typeOfData", "file")
                    .build()
                    .context("build table input")?,
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = aws_sdk_glue::Error::from(err);
                if Self::is_already_exists(&err) {
                    Ok(())
                } else {
                    Err(err).context("create table")
                }
            }
        }
    }

    async fn add_partition(
        &self,
        log_type: &str,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
    ) -> Result<()> {
        let table = table_name(log_type);
        let location = format!(
            "s3://{}/logs/{}/year={}/month={:02}/day={:02}/hour={:02}/",
            self.bucket, table, year, month, day, hour
        );

        let storage = StorageDescriptor::builder()
            .location(location)
            .input_format(INPUT_FORMAT)
            .output_format(OUTPUT_FORMAT)
            .serde_info(Self::serde_info())
            .build();

        let result = self
            .client
            .create_partition()
            .database_name(&self.database)
            .table_name(&table)
            .partition_input(
                PartitionInput::builder()
                    .values(year.to_string())
                    .values(format!("{:02}", month))
                    .values(format!("{:02}", day))
                    .values(format!("{:02}", hour))
                    .storage_descriptor(storage)
                    .build(),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = aws_sdk_glue::Error::from(err);
                if Self::is_already_exists(&err) {
                    Ok(())
                } else {
                    Err(err).context("create partition")
                }
            }
        }
    }
}
