//! Prompt contracts for receipt extraction and fraud scoring.

/// Instruction for the extraction call. The model must answer with exactly
/// the ExtractedReceiptData JSON shape.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert receipt parser. Analyze this receipt and extract structured data.

Extract: merchant name/address, transaction date/time, items (name, quantity, prices), subtotal, tax, total, payment method, currency.

Return JSON only:
{
    "merchant_name": "string or null",
    "merchant_address": "string or null",
    "transaction_date": "YYYY-MM-DD or null",
    "transaction_time": "HH:MM or null",
    "items": [{"name": "string", "quantity": 1, "unit_price": 0.00, "total_price": 0.00}],
    "subtotal": 0.00,
    "tax_amount": 0.00,
    "total_amount": 0.00,
    "payment_method": "string or null",
    "currency": "USD",
    "confidence_score": 0.85
}"#;

/// System message sent with the fraud scoring call.
pub const FRAUD_SYSTEM_PROMPT: &str = "You are a fraud detection AI specialist.";

const FRAUD_PROMPT_TEMPLATE: &str = r#"Analyze this receipt for fraud indicators:

{receipt_data}

Check for: round numbers, weekend transactions, unusual merchants, missing info, unrealistic prices.

Return JSON:
{
    "score": 0-100,
    "risk_level": "LOW" | "MEDIUM" | "HIGH" | "CRITICAL",
    "flags": ["concerns"],
    "explanation": "reasoning",
    "requires_manual_review": true/false
}"#;

/// Build the fraud prompt with the serialized receipt data interpolated.
pub fn fraud_prompt(receipt_data: &str) -> String {
    FRAUD_PROMPT_TEMPLATE.replace("{receipt_data}", receipt_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_names_the_output_shape() {
        assert!(EXTRACTION_PROMPT.contains("\"merchant_name\""));
        assert!(EXTRACTION_PROMPT.contains("\"confidence_score\""));
        assert!(EXTRACTION_PROMPT.contains("Return JSON only"));
    }

    #[test]
    fn test_fraud_prompt_interpolates_receipt_data() {
        let prompt = fraud_prompt("{\"merchant_name\": \"Corner Deli\"}");
        assert!(prompt.contains("Corner Deli"));
        assert!(!prompt.contains("{receipt_data}"));
        assert!(prompt.contains("\"risk_level\""));
        assert!(prompt.contains("requires_manual_review"));
    }
}
