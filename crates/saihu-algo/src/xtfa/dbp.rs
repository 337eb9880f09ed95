//! Delay-bound pipeline (DBP).
//!
//! Bounds the delay the aggregate suffers in the node's queuing subsystem.
//! Each step contributes a (min, max) delta; the deltas accumulate into the
//! node's delay bounds. Steps read the flow states and aggregate curve at
//! the input of the pipeline and never modify them.

use tracing::debug;

use saihu_core::{ClockModel, Curve, CurveError, FlowState, Network, RateLatency, ServerId};

use super::{NodeSetup, XtfaError};

/// Flags the delay steps exchange.
#[derive(Debug, Clone, Default)]
pub struct DbpFlags {
    /// Set by the FIFO step when the service curve is a plain rate-latency.
    pub rate_latency: Option<RateLatency>,
}

/// A computational block of the delay pipeline, returning the (min, max)
/// delay it contributes. The max may be negative for an improvement step.
pub trait DbpStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        states: &[FlowState],
        aggregate: &Curve,
        flags: &mut DbpFlags,
        network: &Network,
        clock: &ClockModel,
    ) -> Result<(f64, f64), XtfaError>;
}

/// FIFO contention: the maximum delay is the horizontal distance between the
/// aggregate arrival curve and the (clock-worsened) service curve. A locally
/// unstable pair yields an infinite bound; the analysis continues.
pub struct FifoContention {
    node: ServerId,
    service: Curve,
}

impl FifoContention {
    pub fn check_install(_setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        // every queuing subsystem of this model is FIFO
        true
    }

    pub fn build(_setup: &NodeSetup, net: &Network, node: ServerId) -> Self {
        Self {
            node,
            service: net.server(node).service.clone(),
        }
    }

    pub fn service_curve(&self) -> &Curve {
        &self.service
    }
}

impl DbpStep for FifoContention {
    fn name(&self) -> &'static str {
        "fifo-contention"
    }

    fn execute(
        &self,
        _states: &[FlowState],
        aggregate: &Curve,
        flags: &mut DbpFlags,
        _network: &Network,
        clock: &ClockModel,
    ) -> Result<(f64, f64), XtfaError> {
        if let Curve::RateLatency(rl) = &self.service {
            flags.rate_latency = Some(*rl);
        }
        // bounds are always stated in TAI
        let service = clock.worsen_service_curve(&self.service);
        let dmax = match aggregate.hdist(&service) {
            Ok(d) => d,
            Err(CurveError::LocallyUnstable) => {
                debug!(node = self.node.value(), "locally unstable, infinite bound");
                f64::INFINITY
            }
            Err(other) => return Err(other.into()),
        };
        debug!(node = self.node.value(), dmax, "fifo contention bound");
        Ok((0.0, dmax))
    }
}

/// Improvement available when the output link speed is known: the last
/// packet's transmission overlaps the queuing bound, saving
/// `max(0, l_min (1/R - 1/c))`.
pub struct MohammadpourImprovement {
    node: ServerId,
    output_link_speed: f64,
}

impl MohammadpourImprovement {
    pub fn check_install(setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        setup.has_tech("MOH") && net.server(node).capacity.value() > 0.0
    }

    pub fn build(_setup: &NodeSetup, net: &Network, node: ServerId) -> Self {
        Self {
            node,
            output_link_speed: net.server(node).capacity.value(),
        }
    }
}

impl DbpStep for MohammadpourImprovement {
    fn name(&self) -> &'static str {
        "mohammadpour-improvement"
    }

    fn execute(
        &self,
        states: &[FlowState],
        _aggregate: &Curve,
        flags: &mut DbpFlags,
        network: &Network,
        _clock: &ClockModel,
    ) -> Result<(f64, f64), XtfaError> {
        let Some(rl) = flags.rate_latency else {
            // only proven for rate-latency service
            return Ok((0.0, 0.0));
        };
        let l_min = states
            .iter()
            .map(|fs| network.flow(fs.flow).min_packet_length)
            .fold(f64::INFINITY, f64::min);
        if !l_min.is_finite() {
            return Ok((0.0, 0.0));
        }
        let improvement = (l_min * (1.0 / rl.rate() - 1.0 / self.output_link_speed)).max(0.0);
        debug!(node = self.node.value(), improvement, "mohammadpour improvement");
        Ok((0.0, -improvement))
    }
}

/// The ordered delay pipeline of one node.
pub struct DbpPipeline {
    steps: Vec<Box<dyn DbpStep>>,
}

impl DbpPipeline {
    pub fn auto_install(
        setup: &NodeSetup,
        network: &Network,
        node: ServerId,
    ) -> Result<Self, XtfaError> {
        let mut steps: Vec<Box<dyn DbpStep>> = Vec::new();
        if FifoContention::check_install(setup, network, node) {
            steps.push(Box::new(FifoContention::build(setup, network, node)));
        }
        if MohammadpourImprovement::check_install(setup, network, node) {
            steps.push(Box::new(MohammadpourImprovement::build(setup, network, node)));
        }
        Ok(Self { steps })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline; the per-step deltas accumulate into the node's
    /// (min, max) delay bounds.
    pub fn process(
        &self,
        states: &[FlowState],
        aggregate: &Curve,
        network: &Network,
        clock: &ClockModel,
    ) -> Result<(f64, f64), XtfaError> {
        let mut flags = DbpFlags::default();
        let mut min_delay = 0.0;
        let mut max_delay = 0.0;
        for step in &self.steps {
            let (dmin, dmax) = step.execute(states, aggregate, &mut flags, network, clock)?;
            min_delay += dmin;
            max_delay += dmax;
        }
        Ok((min_delay, max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saihu_core::{Flow, FlowId, Network, Server};

    fn single_server(capacity: f64) -> Network {
        let server = Server::new(ServerId::new(0), "s0", Curve::rate_latency(4.0, 1.0))
            .with_capacity(capacity);
        let mut net = Network::new("one", vec![server]);
        net.add_flow(
            Flow::new(
                FlowId::new(0),
                "f0",
                vec![ServerId::new(0)],
                Curve::leaky_bucket(1.0, 1.0),
            )
            .with_packet_lengths(64.0, 64.0),
        );
        net
    }

    #[test]
    fn test_fifo_contention_bound() {
        let net = single_server(0.0);
        let setup = NodeSetup::default();
        let pipeline = DbpPipeline::auto_install(&setup, &net, ServerId::new(0)).unwrap();
        let aggregate = Curve::leaky_bucket(2.0, 2.0);
        let (dmin, dmax) = pipeline
            .process(&[], &aggregate, &net, &ClockModel::default())
            .unwrap();
        assert_eq!(dmin, 0.0);
        assert_eq!(dmax, 1.5);
    }

    #[test]
    fn test_unstable_gives_infinite_bound() {
        let net = single_server(0.0);
        let setup = NodeSetup::default();
        let pipeline = DbpPipeline::auto_install(&setup, &net, ServerId::new(0)).unwrap();
        let aggregate = Curve::leaky_bucket(8.0, 2.0);
        let (_, dmax) = pipeline
            .process(&[], &aggregate, &net, &ClockModel::default())
            .unwrap();
        assert!(dmax.is_infinite());
    }

    #[test]
    fn test_mohammadpour_improvement() {
        let net = single_server(8.0);
        let setup = NodeSetup::default().with_tech("MOH");
        let pipeline = DbpPipeline::auto_install(&setup, &net, ServerId::new(0)).unwrap();
        assert_eq!(pipeline.step_names().len(), 2);
        let mut fs = saihu_core::FlowState::new(FlowId::new(0));
        fs.arrival = Curve::leaky_bucket(1.0, 1.0);
        let aggregate = Curve::leaky_bucket(2.0, 2.0);
        let (_, dmax) = pipeline
            .process(&[fs], &aggregate, &net, &ClockModel::default())
            .unwrap();
        // 1.5 - 64 * (1/4 - 1/8) = 1.5 - 8 = negative floor is allowed per
        // accumulation; the improvement itself is 8
        assert_eq!(dmax, 1.5 - 64.0 * (1.0 / 4.0 - 1.0 / 8.0));
    }
}
