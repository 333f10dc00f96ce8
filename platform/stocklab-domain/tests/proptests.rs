use proptest::prelude::*;
use stocklab_domain::entities::metrics::PerformanceAnalyzer;
use stocklab_domain::entities::price_series::PriceSeries;
use stocklab_domain::services::engine::backtest::{EngineSettings, SimulationEngine};
use stocklab_domain::services::engine::execution::ExecutionConfig;
use stocklab_domain::services::strategy::{signals, StrategyConfig};
use stocklab_domain::value_objects::bar::Bar;

fn bar(ts: i64, close: f64) -> Bar {
    Bar {
        timestamp: ts,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: 1.0,
    }
}

fn series(prices: &[f64]) -> PriceSeries {
    let bars = prices
        .iter()
        .copied()
        .enumerate()
        .map(|(idx, close)| bar(idx as i64 * 86_400, close))
        .collect();
    PriceSeries::new("PROP", bars).expect("series")
}

fn strategies() -> impl Strategy<Value = StrategyConfig> {
    prop_oneof![
        (1usize..4, 4usize..8).prop_map(|(fast, slow)| StrategyConfig::golden_cross(fast, slow)),
        (1usize..6).prop_map(StrategyConfig::breakout),
        (2usize..6).prop_map(|period| StrategyConfig::MultiFactor {
            rsi_buy_threshold: 40.0,
            rsi_sell_threshold: 60.0,
            rsi_period: period,
        }),
    ]
}

fn engine(allow_short: bool, commission_rate: f64) -> SimulationEngine {
    SimulationEngine::new(EngineSettings {
        initial_cash: 10_000.0,
        commission_rate,
        execution: ExecutionConfig {
            allow_short,
            ..ExecutionConfig::default()
        },
        ..EngineSettings::default()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn future_bars_never_change_past_decisions(
        prices in prop::collection::vec(1.0f64..1_000.0, 12..60),
        replacement in prop::collection::vec(1.0f64..1_000.0, 60),
        cut in 8usize..11,
        config in strategies(),
        allow_short in any::<bool>(),
    ) {
        let mut mutated = prices.clone();
        for (idx, value) in mutated.iter_mut().enumerate().skip(cut + 1) {
            *value = replacement[idx];
        }

        let original = series(&prices);
        let altered = series(&mutated);

        let a = signals(original.bars(), &config).expect("signals");
        let b = signals(altered.bars(), &config).expect("signals");
        prop_assert_eq!(&a[..=cut], &b[..=cut]);

        let engine = engine(allow_short, 0.001);
        let ra = engine.run(&original, &config).expect("run");
        let rb = engine.run(&altered, &config).expect("run");
        prop_assert_eq!(&ra.equity_curve[..=cut], &rb.equity_curve[..=cut]);
    }

    #[test]
    fn equity_is_cash_plus_marked_position(
        prices in prop::collection::vec(1.0f64..1_000.0, 10..80),
        config in strategies(),
        allow_short in any::<bool>(),
        commission_rate in 0.0f64..0.01,
    ) {
        let result = engine(allow_short, commission_rate)
            .run(&series(&prices), &config)
            .expect("run");
        prop_assert_eq!(result.equity_curve.len(), prices.len());
        for (point, close) in result.equity_curve.iter().zip(prices.iter()) {
            prop_assert_eq!(point.close, *close);
            prop_assert_eq!(point.equity, point.cash + point.position_qty * point.close);
        }
        if !allow_short {
            prop_assert!(result.equity_curve.iter().all(|p| p.position_qty >= 0.0));
        }
    }

    #[test]
    fn identical_inputs_give_identical_results(
        prices in prop::collection::vec(1.0f64..1_000.0, 10..60),
        config in strategies(),
    ) {
        let data = series(&prices);
        let engine = engine(true, 0.0005);
        let first = engine.run(&data, &config).expect("run");
        let second = engine.run(&data, &config).expect("run");
        prop_assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
        prop_assert_eq!(first, second);
    }

    #[test]
    fn drawdown_stays_within_unit_interval(
        equity in prop::collection::vec(0.01f64..100_000.0, 2..200)
    ) {
        let metrics = PerformanceAnalyzer::new(252.0)
            .analyze_values(&equity)
            .expect("metrics");
        prop_assert!(metrics.max_drawdown <= 0.0);
        prop_assert!(metrics.max_drawdown >= -1.0);
        prop_assert!(metrics.sharpe_ratio.is_finite());
    }

    #[test]
    fn engine_drawdown_is_bounded(
        prices in prop::collection::vec(1.0f64..1_000.0, 10..80),
        config in strategies(),
    ) {
        let result = engine(true, 0.002).run(&series(&prices), &config).expect("run");
        prop_assert!((-1.0..=0.0).contains(&result.metrics.max_drawdown));
    }
}
