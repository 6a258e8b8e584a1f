//! Reservation engine demo
//!
//! Walks one small class through its whole life:
//! - Bookings that confirm, go to RAC and then to the waitlist
//! - A cancellation that promotes RAC to confirmed and the waitlist to RAC
//! - A rejected double cancellation
//! - Chart preparation auto-cancelling what is still waitlisted
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info,berth_booking=debug cargo run --bin demo
//! ```

use berth_booking::metrics::register_business_metrics;
use berth_booking::types::{BerthType, ClassConfig, Stop};
use berth_booking::{
    BookingRequest, ClassType, Config, Gender, InMemorySchedule, Money, Passenger,
    ReservationService, StationCode, TracingNotifier, Train, TrainId,
};
use berth_core::environment::SystemClock;
use berth_runtime::metrics::MetricsExporter;
use chrono::{Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn rajdhani() -> Train {
    Train::new("12951", "Mumbai Central - New Delhi Rajdhani")
        .with_utc_offset_minutes(330)
        .with_stop(Stop::new("MMCT", None, NaiveTime::from_hms_opt(17, 0, 0), 0, 0))
        .with_stop(Stop::new(
            "BRC",
            NaiveTime::from_hms_opt(20, 52, 0),
            NaiveTime::from_hms_opt(21, 2, 0),
            0,
            392,
        ))
        .with_stop(Stop::new(
            "KOTA",
            NaiveTime::from_hms_opt(2, 10, 0),
            NaiveTime::from_hms_opt(2, 15, 0),
            1,
            920,
        ))
        .with_stop(Stop::new("NDLS", NaiveTime::from_hms_opt(8, 32, 0), None, 1, 1384))
        .with_class(ClassType::Ac3A, ClassConfig::new(2, Money::new(2, 0)))
        .with_class(ClassType::Ac2A, ClassConfig::new(48, Money::new(2, 90)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,berth_booking=debug,berth_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut exporter = MetricsExporter::new();
    exporter.install()?;
    register_business_metrics();

    println!("\n🚆 ============================================");
    println!("   Seat Reservation Engine - Live Demo");
    println!("============================================\n");

    // A two-berth AC3A coach with one RAC slot keeps the queues short enough to read.
    let mut config = Config::from_env();
    config.policy = config
        .policy
        .with_rac_allowance(ClassType::Ac3A, 1)
        .with_waitlist_ceiling(5);

    let schedule = Arc::new(InMemorySchedule::new().with_train(rajdhani()));
    let service = ReservationService::new(
        &config,
        Arc::new(SystemClock),
        schedule,
        Arc::new(TracingNotifier),
    );

    let train = TrainId::new("12951");
    let travel_date = (Utc::now() + Duration::days(10)).date_naive();

    println!("📋 Train 12951, {travel_date}, AC3A: 2 berths, 1 RAC slot\n");

    // ========== Fare preview ==========

    let preview = service.fare_preview(
        &train,
        &StationCode::new("MMCT"),
        &StationCode::new("NDLS"),
        ClassType::Ac3A,
        &[
            Passenger::new("Meera", 64, Gender::Female),
            Passenger::new("Kabir", 8, Gender::Male),
        ],
    )?;
    println!("1️⃣  Fare preview (senior + child): {}", preview.total);
    println!("{}\n", serde_json::to_string_pretty(&preview)?);

    // ========== Bookings ==========

    println!("2️⃣  Booking four single travellers...");
    let mut pnrs = Vec::new();
    for (name, age) in [("Asha", 34), ("Bilal", 41), ("Chitra", 29), ("Dev", 52)] {
        let request = BookingRequest::new(train.clone(), travel_date, ClassType::Ac3A, "MMCT", "NDLS")
            .with_passenger(
                Passenger::new(name, age, Gender::Female).with_berth_preference(BerthType::Lower),
            );
        let booking = service.create_booking(request).await?;
        let position = service.queue_position(&booking.pnr).await?;
        match position {
            Some(position) => println!("   {name}: PNR {} {} {position}", booking.pnr, booking.status),
            None => println!("   {name}: PNR {} {}", booking.pnr, booking.status),
        }
        pnrs.push(booking.pnr);
    }

    let late = BookingRequest::new(train.clone(), travel_date, ClassType::Ac3A, "BRC", "KOTA")
        .with_passenger(Passenger::new("Esha", 23, Gender::Female));
    match service.create_booking(late).await {
        Ok(booking) => println!("   Esha: PNR {} {}", booking.pnr, booking.status),
        Err(error) => println!("   Esha: {error}"),
    }

    let availability = service.get_availability(&train, travel_date, ClassType::Ac3A).await?;
    println!("\n   Availability:\n{}\n", serde_json::to_string_pretty(&availability)?);

    // ========== Cancellation and promotion ==========

    println!("3️⃣  Asha cancels...");
    let cancelled = service.cancel_booking(&pnrs[0]).await?;
    if let Some(info) = &cancelled.cancellation {
        println!("   Charge {}, refund {}", info.charge, info.refund);
    }
    for pnr in &pnrs[1..] {
        let booking = service.get_booking_by_pnr(pnr).await?;
        println!("   PNR {} is now {}", booking.pnr, booking.status);
    }

    println!("\n4️⃣  Asha tries to cancel again...");
    match service.cancel_booking(&pnrs[0]).await {
        Ok(_) => println!("   ✗ Unexpectedly succeeded"),
        Err(error) => println!("   ✓ Rejected: {error}"),
    }

    // ========== Chart preparation ==========

    println!("\n5️⃣  Preparing the chart...");
    let summary = service.run_chart_preparation(&train, travel_date).await?;
    println!(
        "   {} on the chart, {} auto-cancelled ({} refunded)",
        summary.promoted, summary.auto_cancelled, summary.refunded
    );

    for booking in service.bookings_for_train(&train, travel_date).await? {
        println!(
            "   {} {:<14} {} berths",
            booking.pnr,
            booking.status.as_str(),
            booking.seat_allocations.len()
        );
    }

    if let Some(rendered) = exporter.render() {
        println!("\n📊 Metrics:\n{rendered}");
    }

    service.shutdown();
    println!("\n✅ Demo complete\n");
    Ok(())
}
