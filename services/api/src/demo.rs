use crate::infra::{InMemoryAvailabilitySink, InMemoryPurchaseRepository};
use chrono::Utc;
use clap::Args;
use homebuy::config::{AppConfig, MarketplaceConfig};
use homebuy::error::AppError;
use homebuy::workflows::purchase::{
    AccountStanding, Actor, BuyerId, EngineError, Money, Offer, OfferPaymentMethod,
    OfferSubmission, PaymentChannel, PaymentRequest, PropertyId, PurchaseService,
    PurchaseServiceError, ReviewerId, Role, VerificationEvent, VerificationKind,
};
use rust_decimal::RoundingStrategy;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::sync::Arc;

type DemoService = PurchaseService<InMemoryPurchaseRepository, InMemoryAvailabilitySink>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Offer price proposed by the demo buyer.
    #[arg(long, value_parser = parse_money, default_value = "200000")]
    pub(crate) offer_price: Money,
    /// Deposit proposed alongside the offer.
    #[arg(long, value_parser = parse_money, default_value = "20000")]
    pub(crate) deposit: Money,
    /// Take the listing service offline during approval to show the outbox retry.
    #[arg(long)]
    pub(crate) simulate_outage: bool,
    /// Use marketplace settings from the environment instead of the defaults.
    #[arg(long)]
    pub(crate) use_env_config: bool,
}

fn parse_money(raw: &str) -> Result<Money, String> {
    Money::from_str(raw.trim())
        .map_err(|err| format!("failed to parse '{raw}' as an amount ({err})"))
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        offer_price,
        deposit,
        simulate_outage,
        use_env_config,
    } = args;

    let marketplace = if use_env_config {
        AppConfig::load()?.marketplace
    } else {
        MarketplaceConfig::default()
    };
    let currency = marketplace.currency.clone();

    let sink = Arc::new(InMemoryAvailabilitySink::default());
    let service: DemoService = PurchaseService::new(
        Arc::new(InMemoryPurchaseRepository::default()),
        sink.clone(),
        marketplace,
    );

    let buyer = BuyerId("demo-buyer".to_string());
    let buyer_actor = Actor::Buyer(buyer.clone());
    let reviewer = Actor::Reviewer(ReviewerId("demo-reviewer".to_string()));

    println!("Purchase lifecycle demo");
    let standing = service.register_account(buyer.clone(), [Role::Buyer], Utc::now())?;
    render_standing("Registered account", &standing);

    match service.record_verification(
        VerificationEvent {
            kind: VerificationKind::Identity,
            buyer_id: buyer.clone(),
        },
        Utc::now(),
    ) {
        Ok(_) => println!("  Unexpected: identity accepted before phone"),
        Err(err) => println!("  Identity before phone refused: {err}"),
    }

    let mut standing = standing;
    for kind in [
        VerificationKind::Email,
        VerificationKind::Phone,
        VerificationKind::Identity,
    ] {
        standing = service.record_verification(
            VerificationEvent {
                kind,
                buyer_id: buyer.clone(),
            },
            Utc::now(),
        )?;
    }
    render_standing("\nAfter email, phone, and identity checks", &standing);

    let offer = service.submit_offer(
        &buyer,
        OfferSubmission {
            property_id: PropertyId("demo-property".to_string()),
            offer_price,
            deposit_amount: deposit,
            payment_method: OfferPaymentMethod::Cash,
            estimated_timeline: "90 days".to_string(),
        },
        Utc::now(),
    )?;
    render_offer("\nSubmitted", &offer, &currency);

    sink.set_offline(simulate_outage);
    let offer = match service.approve_offer(&offer.id, &reviewer, None, Utc::now()) {
        Ok(offer) => offer,
        Err(err @ PurchaseServiceError::Engine(EngineError::SideEffectFailed { .. })) => {
            println!("  Approval committed but notification failed: {err}");
            sink.set_offline(false);
            service.retry_offer_effects(&offer.id)?
        }
        Err(other) => return Err(other.into()),
    };
    render_offer("Reviewed", &offer, &currency);

    println!("\nPayments");
    for share in [dec!(0.40), dec!(0.65)] {
        let amount = (offer.offer_price * share)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let payment = service.submit_payment(
            &offer.id,
            &buyer_actor,
            PaymentRequest {
                amount,
                method: PaymentChannel::BankTransfer,
            },
            Utc::now(),
        )?;
        let payment = service.verify_payment(&payment.id, &reviewer, Utc::now())?;
        println!(
            "- {} {} {} -> {}",
            payment.id,
            payment.amount(),
            payment.currency,
            payment.status()
        );
    }

    println!("\nPortfolio");
    for entry in service.portfolio(&buyer)? {
        println!(
            "- {} on {}: paid {} {} ({}%), remaining {} [{}]",
            entry.offer_id,
            entry.property_id,
            entry.total_paid,
            currency,
            entry.percent_complete,
            entry.remaining,
            entry.classification().label()
        );
    }

    let changes = sink.changes();
    if changes.is_empty() {
        println!("\nAvailability changes: none delivered");
    } else {
        println!("\nAvailability changes");
        for (property_id, available) in changes {
            let state = if available { "available" } else { "reserved" };
            println!("- {property_id} -> {state}");
        }
    }

    Ok(())
}

fn render_standing(heading: &str, standing: &AccountStanding) {
    println!("{heading}: {} at level {}", standing.buyer_id, standing.level);
    let permissions: Vec<&str> = standing
        .permissions
        .iter()
        .map(|permission| permission.label())
        .collect();
    println!("  Permissions: {}", permissions.join(", "));
}

fn render_offer(heading: &str, offer: &Offer, currency: &str) {
    let expiry = offer
        .expires_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{heading} offer {} for {}: {} {} ({}), expires {}",
        offer.id,
        offer.property_id,
        offer.offer_price,
        currency,
        offer.status(),
        expiry
    );
    if !offer.pending_effects().is_empty() {
        println!(
            "  {} availability change(s) waiting in the outbox",
            offer.pending_effects().len()
        );
    }
}
