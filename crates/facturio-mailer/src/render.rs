//! Plain-text invoice document renderer.

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{round2, Invoice};
use facturio_core::repo::{DocumentRenderer, EmailAttachment};

/// Renders an invoice as a plain-text document attachment.
pub struct TextDocumentRenderer;

impl DocumentRenderer for TextDocumentRenderer {
    fn render_invoice(&self, invoice: &Invoice) -> Result<EmailAttachment> {
        if invoice.lines.is_empty() {
            return Err(FacturioError::Render(format!(
                "invoice {} has no lines",
                invoice.number
            )));
        }

        let mut doc = String::new();
        doc.push_str(&format!("FACTURE {}\n", invoice.number));
        doc.push_str(&format!("Client : {}\n", invoice.client_name));
        doc.push_str(&format!(
            "Émise le {} — échéance le {}\n\n",
            invoice.issue_date.format("%Y-%m-%d"),
            invoice.due_date.format("%Y-%m-%d")
        ));
        for line in &invoice.lines {
            doc.push_str(&format!(
                "  {:<40} {:>8.2} x {:>10.2} = {:>12.2}\n",
                line.description,
                line.quantity,
                line.unit_price,
                round2(line.amount())
            ));
        }
        doc.push_str(&format!("\nTOTAL : {:.2}\n", round2(invoice.total)));
        doc.push_str(&format!("Restant dû : {:.2}\n", round2(invoice.outstanding)));

        Ok(EmailAttachment {
            filename: format!("{}.txt", invoice.number),
            content_type: "text/plain; charset=utf-8".into(),
            bytes: doc.into_bytes(),
        })
    }
}
