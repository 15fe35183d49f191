//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the engine's external
//! collaborator traits, allowing full pipeline tests without real
//! infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use tally_core::testing::{fixtures, MockImageSource, MockLlmClient};
//!
//! let images = MockImageSource::new();
//! images.insert("receipts/r-1.jpg", b"jpeg".to_vec());
//!
//! let llm = MockLlmClient::new();
//! llm.push_response(fixtures::extraction_json());
//! llm.push_response(fixtures::low_risk_fraud_json());
//!
//! // Use in a WorkflowEngine...
//! ```

mod mock_image_source;
mod mock_llm;

pub use mock_image_source::MockImageSource;
pub use mock_llm::MockLlmClient;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::engine::{ExtractedReceiptData, ReceiptItem};

    /// A clean, internally consistent extraction payload: items sum to the
    /// subtotal, the date is in the past, confidence is high.
    pub fn extraction_json() -> String {
        r#"{
            "merchant_name": "Fresh Mart",
            "merchant_address": "12 Bay St",
            "transaction_date": "2026-03-15",
            "transaction_time": "13:42",
            "items": [
                {"name": "Latte", "quantity": 2, "unit_price": 2.25, "total_price": 4.5},
                {"name": "Sandwich", "quantity": 1, "unit_price": 6.0, "total_price": 6.0}
            ],
            "subtotal": 10.5,
            "tax_amount": 0.84,
            "total_amount": 11.34,
            "payment_method": "card",
            "currency": "USD",
            "confidence_score": 0.92
        }"#
        .to_string()
    }

    /// An extraction payload that trips four validation rules, enough to
    /// route the run to manual review.
    pub fn unvalidatable_extraction_json() -> String {
        r#"{
            "merchant_name": "",
            "total_amount": 0,
            "transaction_date": "sometime",
            "confidence_score": 0.1
        }"#
        .to_string()
    }

    pub fn low_risk_fraud_json() -> String {
        r#"{
            "score": 12,
            "risk_level": "LOW",
            "flags": [],
            "explanation": "Amounts are consistent and modest",
            "requires_manual_review": false
        }"#
        .to_string()
    }

    pub fn high_risk_fraud_json() -> String {
        r#"{
            "score": 85,
            "risk_level": "HIGH",
            "flags": ["Round number total", "Missing tax line"],
            "explanation": "Multiple manipulation indicators",
            "requires_manual_review": true
        }"#
        .to_string()
    }

    /// The struct form of [`extraction_json`].
    pub fn sample_extracted() -> ExtractedReceiptData {
        ExtractedReceiptData {
            merchant_name: Some("Fresh Mart".to_string()),
            merchant_address: Some("12 Bay St".to_string()),
            transaction_date: Some("2026-03-15".to_string()),
            transaction_time: Some("13:42".to_string()),
            items: vec![
                ReceiptItem {
                    name: "Latte".to_string(),
                    quantity: 2,
                    unit_price: 2.25,
                    total_price: 4.5,
                },
                ReceiptItem {
                    name: "Sandwich".to_string(),
                    quantity: 1,
                    unit_price: 6.0,
                    total_price: 6.0,
                },
            ],
            subtotal: Some(10.5),
            tax_amount: Some(0.84),
            total_amount: Some(11.34),
            payment_method: Some("card".to_string()),
            currency: "USD".to_string(),
            confidence_score: 0.92,
        }
    }
}
