use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Fixed-point price in cents
    pub price_cents: i64,
    /// Opaque content reference (URL or file token) sent to the buyer after payment
    pub content: String,
    pub created_at: i64,
}

impl Product {
    /// Price as a decimal string with two fraction digits (e.g. 1990 -> "19.90").
    pub fn price_decimal(&self) -> String {
        format!("{}.{:02}", self.price_cents / 100, self.price_cents % 100)
    }

    /// Price in currency units for gateway requests.
    pub fn price_amount(&self) -> f64 {
        self.price_cents as f64 / 100.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub content: String,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Product name cannot be empty".into()));
        }
        if self.price_cents <= 0 {
            return Err(AppError::BadRequest("Product price must be positive".into()));
        }
        if self.content.trim().is_empty() {
            return Err(AppError::BadRequest("Product content cannot be empty".into()));
        }
        Ok(())
    }
}
