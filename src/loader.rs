//! Data loader
//!
//! Reads the four datasets from a data directory and validates their schema.
//! Any problem here is fatal for the session: the error names the offending
//! file and column/field.

use crate::error::AssistantError;
use crate::models::{
    FinancialData, InvestorProfile, Product, ServiceHistoryRecord, Transaction, TransactionKind,
};
use crate::security::validate_data_path;
use crate::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FILE_TRANSACTIONS: &str = "transacoes.csv";
pub const FILE_HISTORY: &str = "historico_atendimento.csv";
pub const FILE_PROFILE: &str = "perfil_investidor.json";
pub const FILE_PRODUCTS: &str = "produtos_financeiros.json";

const TRANSACTION_COLUMNS: &[&str] = &["data", "descricao", "categoria", "valor", "tipo"];
const HISTORY_COLUMNS: &[&str] = &["data", "canal", "tema", "resumo", "resolvido"];
const PROFILE_REQUIRED_FIELDS: &[&str] = &["nome", "perfil_investidor", "renda_mensal", "metas"];
const PRODUCT_REQUIRED_FIELDS: &[&str] = &["nome", "categoria", "risco", "indicado_para"];

#[derive(Debug, Deserialize)]
struct TransactionRow {
    data: String,
    descricao: String,
    categoria: String,
    valor: String,
    tipo: String,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    data: String,
    canal: String,
    tema: String,
    resumo: String,
    resolvido: String,
}

/// Loads and validates the financial datasets from one directory
pub struct DataLoader {
    data_dir: PathBuf,
}

impl DataLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load all four datasets, failing on the first invalid file
    pub fn load_all(&self) -> Result<FinancialData> {
        let transactions = self.load_transactions()?;
        let history = self.load_history()?;
        let profile = self.load_profile()?;
        let products = self.load_products()?;

        info!(
            data_dir = %self.data_dir.display(),
            transactions = transactions.len(),
            history = history.len(),
            products = products.len(),
            "Financial data loaded"
        );

        Ok(FinancialData {
            transactions,
            history,
            profile,
            products,
        })
    }

    pub fn load_transactions(&self) -> Result<Vec<Transaction>> {
        let path = self.existing_file(FILE_TRANSACTIONS)?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)?;

        require_columns(reader.headers()?, TRANSACTION_COLUMNS, FILE_TRANSACTIONS)?;

        let mut transactions = Vec::new();
        for result in reader.deserialize::<TransactionRow>() {
            let row = result?;
            let line = transactions.len() + 2;

            let kind = match row.tipo.to_lowercase().as_str() {
                "entrada" => TransactionKind::Inflow,
                "saida" | "saída" => TransactionKind::Outflow,
                other => {
                    return Err(AssistantError::InvalidValue {
                        file: FILE_TRANSACTIONS.to_string(),
                        field: "tipo".to_string(),
                        detail: format!("'{}' na linha {} (esperado entrada ou saida)", other, line),
                    })
                }
            };

            transactions.push(Transaction {
                date: parse_date(&row.data, FILE_TRANSACTIONS, line)?,
                description: row.descricao,
                category: row.categoria,
                amount: parse_amount(&row.valor, FILE_TRANSACTIONS, line)?,
                kind,
            });
        }

        debug!(count = transactions.len(), "Transactions parsed");
        Ok(transactions)
    }

    pub fn load_history(&self) -> Result<Vec<ServiceHistoryRecord>> {
        let path = self.existing_file(FILE_HISTORY)?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)?;

        require_columns(reader.headers()?, HISTORY_COLUMNS, FILE_HISTORY)?;

        let mut records = Vec::new();
        for result in reader.deserialize::<HistoryRow>() {
            let row = result?;
            let line = records.len() + 2;

            records.push(ServiceHistoryRecord {
                date: parse_date(&row.data, FILE_HISTORY, line)?,
                channel: row.canal,
                topic: row.tema,
                summary: row.resumo,
                resolved: parse_flag(&row.resolvido, line)?,
            });
        }

        debug!(count = records.len(), "Service history parsed");
        Ok(records)
    }

    pub fn load_profile(&self) -> Result<InvestorProfile> {
        let path = self.existing_file(FILE_PROFILE)?;
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;

        let object = raw.as_object().ok_or_else(|| AssistantError::InvalidValue {
            file: FILE_PROFILE.to_string(),
            field: "(raiz)".to_string(),
            detail: "deve conter um objeto JSON".to_string(),
        })?;

        let missing: Vec<String> = PROFILE_REQUIRED_FIELDS
            .iter()
            .filter(|field| !object.contains_key(**field))
            .map(|field| field.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(AssistantError::MissingFields {
                file: FILE_PROFILE.to_string(),
                fields: missing,
            });
        }

        let profile: InvestorProfile = serde_json::from_value(raw)?;

        if profile.monthly_income.is_some_and(|income| income < 0.0) {
            return Err(AssistantError::InvalidValue {
                file: FILE_PROFILE.to_string(),
                field: "renda_mensal".to_string(),
                detail: "valor negativo".to_string(),
            });
        }

        Ok(profile)
    }

    pub fn load_products(&self) -> Result<Vec<Product>> {
        let path = self.existing_file(FILE_PRODUCTS)?;
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;

        let items = raw.as_array().ok_or_else(|| AssistantError::InvalidValue {
            file: FILE_PRODUCTS.to_string(),
            field: "(raiz)".to_string(),
            detail: "deve conter uma lista de produtos".to_string(),
        })?;

        let mut products = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let missing: Vec<String> = PRODUCT_REQUIRED_FIELDS
                .iter()
                .filter(|field| item.get(**field).is_none())
                .map(|field| field.to_string())
                .collect();

            if !missing.is_empty() {
                return Err(AssistantError::MissingFields {
                    file: format!("{} (produto {})", FILE_PRODUCTS, idx),
                    fields: missing,
                });
            }

            products.push(serde_json::from_value::<Product>(item.clone())?);
        }

        Ok(products)
    }

    fn existing_file(&self, name: &str) -> Result<PathBuf> {
        let path = self.data_dir.join(name);
        if !path.is_file() {
            return Err(AssistantError::MissingFile(path.display().to_string()));
        }
        if !validate_data_path(&path, &self.data_dir) {
            return Err(AssistantError::InvalidInput(format!(
                "{} aponta para fora do diretório de dados",
                path.display()
            )));
        }
        Ok(path)
    }
}

fn require_columns(headers: &csv::StringRecord, required: &[&str], file: &str) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AssistantError::MissingColumns {
            file: file.to_string(),
            columns: missing,
        })
    }
}

/// Accepts ISO dates, ISO date-times and Brazilian day-first dates
pub fn parse_date(value: &str, file: &str, line: usize) -> Result<NaiveDate> {
    let value = value.trim();

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .map_err(|_| AssistantError::InvalidDate {
            file: file.to_string(),
            line,
            value: value.to_string(),
        })
}

fn parse_amount(value: &str, file: &str, line: usize) -> Result<f64> {
    let normalized = if value.contains(',') && !value.contains('.') {
        value.replace(',', ".")
    } else {
        value.to_string()
    };

    let amount: f64 = normalized.trim().parse().map_err(|_| AssistantError::InvalidValue {
        file: file.to_string(),
        field: "valor".to_string(),
        detail: format!("'{}' na linha {}", value, line),
    })?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(AssistantError::InvalidValue {
            file: file.to_string(),
            field: "valor".to_string(),
            detail: format!("'{}' na linha {} (deve ser não negativo)", value, line),
        });
    }

    Ok(amount)
}

fn parse_flag(value: &str, line: usize) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "sim" | "true" | "1" | "s" => Ok(true),
        "não" | "nao" | "false" | "0" | "n" => Ok(false),
        other => Err(AssistantError::InvalidValue {
            file: FILE_HISTORY.to_string(),
            field: "resolvido".to_string(),
            detail: format!("'{}' na linha {}", other, line),
        }),
    }
}
