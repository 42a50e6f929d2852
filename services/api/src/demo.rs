use crate::infra::{InMemoryIntakeBackend, DEMO_OTP_CODE};
use clap::Args;
use loan_intake::error::AppError;
use loan_intake::workflows::intake::{
    ApplicationId, BankId, DraftInput, IntakeView, IntakeWizard, OtpEntry, OtpSession,
    ProductType, StatementDocument, TransitionError, UploadedFile,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seeded application to walk through (app-000001 approves, app-000002 rejects, app-000003 stays pending)
    #[arg(long, default_value = "app-000001")]
    pub(crate) application: String,
    /// Requested amount as typed by the applicant
    #[arg(long, default_value = "450 000")]
    pub(crate) amount: String,
    /// Term in months
    #[arg(long, default_value_t = 12)]
    pub(crate) term: u32,
    /// Apply for an installment instead of a cash loan
    #[arg(long)]
    pub(crate) installment: bool,
    /// Leave the statement step without uploading a document
    #[arg(long)]
    pub(crate) skip_statement: bool,
    /// Upload a statement the checker reports as outdated
    #[arg(long)]
    pub(crate) stale_statement: bool,
    /// Enter a wrong code once before the right one
    #[arg(long)]
    pub(crate) wrong_code_first: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let backend = Arc::new(InMemoryIntakeBackend::seeded());
    println!("Loan intake demo");
    println!("Seeded applications: {}", backend.application_ids().join(", "));

    let mut wizard = IntakeWizard::start(
        backend,
        ApplicationId(args.application.clone()),
        OtpSession::default(),
    )
    .await?;
    render_step(&wizard.view());

    let product_type = if args.installment {
        ProductType::Installment
    } else {
        ProductType::Loan
    };
    report(wizard.update_draft(DraftInput {
        product_type: Some(product_type),
        term: Some(args.term),
        amount: Some(args.amount.clone()),
        ..DraftInput::default()
    }));
    if !report(wizard.advance().await) {
        return Ok(());
    }
    render_step(&wizard.view());

    report(wizard.update_draft(DraftInput {
        iin: Some("900101300123".to_string()),
        first_name: Some("Aigerim".to_string()),
        last_name: Some("Nurlanova".to_string()),
        phone: Some("+7 (701) 555-12-34".to_string()),
        preferred_payment_day: Some("10".to_string()),
        ..DraftInput::default()
    }));
    if !report(wizard.advance().await) {
        return Ok(());
    }
    render_step(&wizard.view());

    if args.skip_statement {
        if let Err(TransitionError::ConfirmationRequired(prompt)) = wizard.skip(false).await {
            println!("  Prompt: {prompt}");
            println!("  Applicant confirms");
        }
        if !report(wizard.skip(true).await) {
            return Ok(());
        }
    } else {
        let file_name = if args.stale_statement {
            "stale-statement.pdf"
        } else {
            "statement.pdf"
        };
        let document = StatementDocument::from_upload(UploadedFile {
            file_name: file_name.to_string(),
            content_type: Some("application/pdf".to_string()),
            bytes: b"%PDF-1.7\n% demo statement\n%%EOF".to_vec(),
        });
        match document {
            Ok(document) => {
                report(wizard.attach_document(BankId("kaspi".to_string()), document));
            }
            Err(err) => println!("  Upload rejected: {err}"),
        }
        if !report(wizard.advance().await) {
            return Ok(());
        }
        if let Some(notice) = wizard.view().statement_notice {
            println!("  Statement notice: {notice}");
        }
    }
    render_step(&wizard.view());

    if args.wrong_code_first {
        println!("  Entering 000000");
        report(wizard.input_otp("000000").await);
    }
    println!("  Entering {DEMO_OTP_CODE}");
    match wizard.input_otp(DEMO_OTP_CODE).await {
        Ok(OtpEntry::Verified(outcome)) => {
            render_step(&wizard.view());
            println!("  Outcome: {}", outcome.label());
        }
        Ok(OtpEntry::Buffered) => println!("  Code buffered, waiting for more digits"),
        Err(err) => println!("  Verification failed: {err}"),
    }

    let view = wizard.view();
    if let Some(record) = view.record {
        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("  Final record:\n{json}"),
            Err(err) => println!("  Final record unavailable: {err}"),
        }
    }

    Ok(())
}

fn render_step(view: &IntakeView) {
    println!("\nStep {} ({})", view.step_number, view.step);
}

/// Print a refused transition. Returns whether the operation succeeded.
fn report<T>(result: Result<T, TransitionError>) -> bool {
    match result {
        Ok(_) => true,
        Err(TransitionError::Validation(errors)) => {
            println!("  Validation failed:");
            for (field, message) in errors.iter() {
                println!("    - {field:?}: {message}");
            }
            false
        }
        Err(err) => {
            println!("  {err}");
            false
        }
    }
}
