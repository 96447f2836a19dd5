// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::db::models::{DbType, RuntimeKind};
use crate::workspace::{BUILD_FILE, COMPOSE_FILE, MysqlSecrets, SEED_FILE};

const PHP_COMPOSE: &str = include_str!("../templates/php/docker-compose.yml");
const PHP_BUILD: &str = include_str!("../templates/php/Dockerfile");
const FLASK_COMPOSE: &str = include_str!("../templates/flask/docker-compose.yml");
const FLASK_BUILD: &str = include_str!("../templates/flask/Dockerfile");

const MYSQL_IMAGE: &str = "mysql:8.0";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Template key {0} has no value")]
    MissingKey(&'static str),
    #[error("Database type {0:?} requires credentials")]
    MissingCredentials(DbType),
    #[error("Template rendering error: {0}")]
    Render(#[from] tera::Error),
    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Rendered service descriptor is not valid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Failed to write {0}: {1}")]
    Write(String, std::io::Error),
}

/// Every `{{KEY}}` placeholder a template pair may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateKey {
    HostPort,
    ContainerPort,
    RuntimeVersion,
    AppEnvironment,
    AppDependsOn,
    DbService,
    Volumes,
    PhpExtensions,
    PipPackages,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::HostPort => "HOST_PORT",
            TemplateKey::ContainerPort => "CONTAINER_PORT",
            TemplateKey::RuntimeVersion => "RUNTIME_VERSION",
            TemplateKey::AppEnvironment => "APP_ENVIRONMENT",
            TemplateKey::AppDependsOn => "APP_DEPENDS_ON",
            TemplateKey::DbService => "DB_SERVICE",
            TemplateKey::Volumes => "VOLUMES",
            TemplateKey::PhpExtensions => "PHP_EXTENSIONS",
            TemplateKey::PipPackages => "PIP_PACKAGES",
        }
    }

    /// Keys that must have a value (possibly empty) before the templates of a runtime can be
    /// rendered.
    pub fn required(runtime: RuntimeKind) -> Vec<TemplateKey> {
        let mut keys = vec![
            TemplateKey::HostPort,
            TemplateKey::ContainerPort,
            TemplateKey::RuntimeVersion,
        ];
        // Database blocks are rendered empty for `none`, never left out
        keys.extend([
            TemplateKey::AppEnvironment,
            TemplateKey::AppDependsOn,
            TemplateKey::DbService,
            TemplateKey::Volumes,
        ]);
        match runtime {
            RuntimeKind::Php => keys.push(TemplateKey::PhpExtensions),
            RuntimeKind::Flask => keys.push(TemplateKey::PipPackages),
        }
        keys
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorParams<'a> {
    pub runtime: RuntimeKind,
    pub runtime_version: &'a str,
    pub host_port: u16,
    pub db_type: DbType,
    pub mysql: Option<&'a MysqlSecrets>,
    pub has_seed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDescriptors {
    pub compose: String,
    pub build: String,
}

fn templates(runtime: RuntimeKind) -> (&'static str, &'static str) {
    match runtime {
        RuntimeKind::Php => (PHP_COMPOSE, PHP_BUILD),
        RuntimeKind::Flask => (FLASK_COMPOSE, FLASK_BUILD),
    }
}

/// Double-quoted YAML scalar with `$` escaped against compose interpolation.
fn quote(value: &str) -> Result<String, DescriptorError> {
    Ok(serde_json::to_string(&value.replace('$', "$$"))?)
}

fn app_environment(secrets: &MysqlSecrets) -> Result<String, DescriptorError> {
    let mut block = String::from("    environment:\n");
    block.push_str("      DB_HOST: \"db\"\n");
    block.push_str("      DB_PORT: \"3306\"\n");
    block.push_str(&format!("      DB_NAME: {}\n", quote(&secrets.mysql_database)?));
    block.push_str(&format!("      DB_USER: {}\n", quote(&secrets.mysql_user)?));
    block.push_str(&format!(
        "      DB_PASSWORD: {}\n",
        quote(&secrets.mysql_password)?
    ));
    Ok(block)
}

fn db_service(secrets: &MysqlSecrets, has_seed: bool) -> Result<String, DescriptorError> {
    let mut block = String::from("  db:\n");
    block.push_str(&format!("    image: {MYSQL_IMAGE}\n"));
    block.push_str("    restart: unless-stopped\n");
    block.push_str("    environment:\n");
    block.push_str(&format!(
        "      MYSQL_ROOT_PASSWORD: {}\n",
        quote(&secrets.mysql_root_password)?
    ));
    block.push_str(&format!("      MYSQL_DATABASE: {}\n", quote(&secrets.mysql_database)?));
    // The mysql image refuses MYSQL_USER=root, root already exists
    if secrets.mysql_user != "root" {
        block.push_str(&format!("      MYSQL_USER: {}\n", quote(&secrets.mysql_user)?));
        block.push_str(&format!(
            "      MYSQL_PASSWORD: {}\n",
            quote(&secrets.mysql_password)?
        ));
    }
    block.push_str("    volumes:\n");
    block.push_str("      - db_data:/var/lib/mysql\n");
    if has_seed {
        block.push_str(&format!(
            "      - ./pack/{SEED_FILE}:/docker-entrypoint-initdb.d/{SEED_FILE}:ro\n"
        ));
    }
    Ok(block)
}

fn values(params: &DescriptorParams<'_>) -> Result<BTreeMap<TemplateKey, String>, DescriptorError> {
    let mut values = BTreeMap::new();
    values.insert(TemplateKey::HostPort, params.host_port.to_string());
    values.insert(
        TemplateKey::ContainerPort,
        params.runtime.container_port().to_string(),
    );
    values.insert(
        TemplateKey::RuntimeVersion,
        params.runtime_version.to_string(),
    );

    let mysql = match params.db_type {
        DbType::None => None,
        DbType::Mysql => Some(
            params
                .mysql
                .ok_or(DescriptorError::MissingCredentials(params.db_type))?,
        ),
    };
    match mysql {
        Some(secrets) => {
            values.insert(TemplateKey::AppEnvironment, app_environment(secrets)?);
            values.insert(
                TemplateKey::AppDependsOn,
                "    depends_on:\n      - db\n".to_string(),
            );
            values.insert(TemplateKey::DbService, db_service(secrets, params.has_seed)?);
            values.insert(TemplateKey::Volumes, "volumes:\n  db_data:\n".to_string());
        }
        None => {
            for key in [
                TemplateKey::AppEnvironment,
                TemplateKey::AppDependsOn,
                TemplateKey::DbService,
                TemplateKey::Volumes,
            ] {
                values.insert(key, String::new());
            }
        }
    }

    match params.runtime {
        RuntimeKind::Php => {
            let extensions = if mysql.is_some() {
                "RUN docker-php-ext-install mysqli pdo_mysql\n"
            } else {
                ""
            };
            values.insert(TemplateKey::PhpExtensions, extensions.to_string());
        }
        RuntimeKind::Flask => {
            let packages = if mysql.is_some() {
                " pymysql cryptography"
            } else {
                ""
            };
            values.insert(TemplateKey::PipPackages, packages.to_string());
        }
    }
    Ok(values)
}

/// Renders the service and build descriptors. No filesystem access.
pub fn render(params: &DescriptorParams<'_>) -> Result<RenderedDescriptors, DescriptorError> {
    let values = values(params)?;
    let mut ctx = tera::Context::new();
    for key in TemplateKey::required(params.runtime) {
        let value = values
            .get(&key)
            .ok_or(DescriptorError::MissingKey(key.as_str()))?;
        ctx.insert(key.as_str(), value);
    }

    let (compose_template, build_template) = templates(params.runtime);
    // Tera fails on any placeholder missing from the context
    let compose = tera::Tera::one_off(compose_template, &ctx, false)?;
    let build = tera::Tera::one_off(build_template, &ctx, false)?;
    serde_yaml::from_str::<serde_yaml::Value>(&compose)?;

    Ok(RenderedDescriptors { compose, build })
}

/// Renders both descriptors into `target_dir`.
pub async fn write_compose_files(
    target_dir: &Path,
    params: &DescriptorParams<'_>,
) -> Result<(), DescriptorError> {
    let rendered = render(params)?;
    for (file_name, content) in [(COMPOSE_FILE, rendered.compose), (BUILD_FILE, rendered.build)] {
        let path = target_dir.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| DescriptorError::Write(path.to_string_lossy().to_string(), e))?;
    }
    Ok(())
}
