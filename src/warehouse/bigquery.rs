// src/warehouse/bigquery.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::error::Error as BqError;
use google_cloud_bigquery::http::job::get::GetJobRequest;
use google_cloud_bigquery::http::job::{
    CreateDisposition as BqCreate, Job, JobConfiguration, JobConfigurationLoad, JobReference,
    JobState, JobType, WriteDisposition as BqWrite,
};
use google_cloud_bigquery::http::table::{
    SourceFormat, Table, TableFieldMode, TableFieldSchema, TableFieldType, TableReference,
    TableSchema,
};
use tracing::debug;

use super::{
    Column, ColumnType, CreateDisposition, JobHandle, JobStatus, LoadRequest, Warehouse,
    WriteDisposition,
};

/// BigQuery dataset as a [`Warehouse`].
pub struct BigQueryWarehouse {
    client: Client,
    project: String,
    dataset: String,
}

impl BigQueryWarehouse {
    /// Authenticate from the environment. `project` overrides the one in the credentials.
    pub async fn new(project: Option<String>, dataset: &str) -> Result<Self> {
        let (config, cred_project) = ClientConfig::new_with_auth()
            .await
            .context("authenticating BigQuery client")?;
        let project = project
            .or(cred_project)
            .ok_or_else(|| anyhow!("no project id from credentials; pass --project"))?;
        let client = Client::new(config)
            .await
            .context("creating BigQuery client")?;
        Ok(Self {
            client,
            project,
            dataset: dataset.to_string(),
        })
    }

    fn table_ref(&self, table: &str) -> TableReference {
        TableReference {
            project_id: self.project.clone(),
            dataset_id: self.dataset.clone(),
            table_id: table.to_string(),
        }
    }
}

fn field_schema(columns: &[Column]) -> TableSchema {
    TableSchema {
        fields: columns
            .iter()
            .map(|c| TableFieldSchema {
                name: c.name.clone(),
                data_type: match c.ty {
                    ColumnType::Integer => TableFieldType::Integer,
                    ColumnType::Float => TableFieldType::Float,
                    ColumnType::String => TableFieldType::String,
                },
                mode: Some(TableFieldMode::Nullable),
                description: Some(c.description.clone()),
                ..Default::default()
            })
            .collect(),
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        match self
            .client
            .table()
            .get(&self.project, &self.dataset, table)
            .await
        {
            Ok(_) => Ok(true),
            Err(BqError::Response(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("looking up {}.{}.{}", self.project, self.dataset, table)),
        }
    }

    async fn create_table(&self, table: &str, columns: &[Column], description: &str) -> Result<()> {
        let t = Table {
            table_reference: self.table_ref(table),
            description: Some(description.to_string()),
            schema: Some(field_schema(columns)),
            ..Default::default()
        };
        self.client
            .table()
            .create(&t)
            .await
            .with_context(|| format!("creating {}.{}.{}", self.project, self.dataset, table))?;
        Ok(())
    }

    async fn start_bulk_load(&self, req: &LoadRequest) -> Result<JobHandle> {
        let load = JobConfigurationLoad {
            source_uris: vec![req.source_uri.clone()],
            schema: Some(field_schema(&req.columns)),
            destination_table: self.table_ref(&req.table),
            create_disposition: Some(match req.create_disposition {
                CreateDisposition::CreateNever => BqCreate::CreateNever,
                CreateDisposition::CreateIfNeeded => BqCreate::CreateIfNeeded,
            }),
            write_disposition: Some(match req.write_disposition {
                WriteDisposition::WriteAppend => BqWrite::WriteAppend,
                WriteDisposition::WriteTruncate => BqWrite::WriteTruncate,
                WriteDisposition::WriteEmpty => BqWrite::WriteEmpty,
            }),
            skip_leading_rows: Some(req.skip_leading_rows as i64),
            source_format: Some(SourceFormat::Csv),
            ..Default::default()
        };
        let job = Job {
            job_reference: JobReference {
                project_id: self.project.clone(),
                job_id: req.job_id.clone(),
                location: None,
            },
            configuration: JobConfiguration {
                job: JobType::Load(load),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = self
            .client
            .job()
            .create(&job)
            .await
            .with_context(|| format!("starting load of {}", req.source_uri))?;
        debug!(job = %req.job_id, location = ?created.job_reference.location, "job created");
        Ok(JobHandle {
            id: created.job_reference.job_id,
            location: created.job_reference.location,
        })
    }

    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus> {
        let req = GetJobRequest {
            location: job.location.clone(),
        };
        let j = self
            .client
            .job()
            .get(&self.project, &job.id, &req)
            .await
            .with_context(|| format!("polling job {}", job.id))?;
        let mut errors: Vec<String> = j
            .status
            .errors
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.message.unwrap_or_else(|| "unknown error".to_string()))
            .collect();
        if let Some(fatal) = j.status.error_result {
            let msg = fatal.message.unwrap_or_else(|| "job failed".to_string());
            if !errors.contains(&msg) {
                errors.push(msg);
            }
        }
        Ok(JobStatus {
            done: j.status.state == JobState::Done,
            errors,
        })
    }
}
