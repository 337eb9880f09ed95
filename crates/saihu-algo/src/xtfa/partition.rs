//! Flow-state partitions.
//!
//! The aggregate-computation pipeline groups flow states into partitions:
//! each partition element is a set of states whose aggregate is shaped by a
//! common curve (an input link, a packet-elimination envelope, a regulator
//! reference). The resulting arrival curve of a partition is the sum over
//! its elements of `shaping (conv) sum-of-members`; the final aggregate is
//! the convolution of all partitions with the plain sum of the states.
//!
//! States are referred to by a pipeline-local identifier so that elements
//! stay valid while steps insert, merge and remove states.

use saihu_core::{Curve, FlowState};

use super::XtfaError;

/// Pipeline-local identifier of a flow state.
pub type StateId = usize;

/// A flow state with its pipeline-local identity.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: StateId,
    pub state: FlowState,
}

/// The working list of flow states inside one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct StateList {
    slots: Vec<Slot>,
    next_id: StateId,
}

impl StateList {
    pub fn new(states: Vec<FlowState>) -> Self {
        let mut list = Self::default();
        for state in states {
            list.push(state);
        }
        list
    }

    pub fn push(&mut self, state: FlowState) -> StateId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot { id, state });
        id
    }

    pub fn remove(&mut self, id: StateId) -> Option<FlowState> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos).state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    pub fn get(&self, id: StateId) -> Option<&FlowState> {
        self.slots.iter().find(|s| s.id == id).map(|s| &s.state)
    }

    pub fn get_mut(&mut self, id: StateId) -> Option<&mut FlowState> {
        self.slots
            .iter_mut()
            .find(|s| s.id == id)
            .map(|s| &mut s.state)
    }

    pub fn ids(&self) -> Vec<StateId> {
        self.slots.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn into_states(self) -> Vec<FlowState> {
        self.slots.into_iter().map(|s| s.state).collect()
    }
}

/// One element of a partition: member states and their common shaping curve.
#[derive(Debug, Clone, Default)]
pub struct PartitionElement {
    pub members: Vec<StateId>,
    /// `None` means no shaping (equivalent to an infinite shaping curve).
    pub shaping: Option<Curve>,
    /// Set on elements carrying a packet-elimination ancestor envelope.
    pub from_ancestor_deconvolution: bool,
}

impl PartitionElement {
    /// Largest packet among the member flows.
    pub fn max_packet_length(
        &self,
        states: &StateList,
        network: &saihu_core::Network,
    ) -> f64 {
        self.members
            .iter()
            .filter_map(|id| states.get(*id))
            .map(|fs| network.flow(fs.flow).max_packet_length)
            .fold(0.0, f64::max)
    }

    /// `shaping (conv) sum of member arrival curves`; the plain sum when no
    /// shaping applies.
    pub fn resulting_curve(&self, states: &StateList) -> Result<Curve, XtfaError> {
        let mut sum = Curve::None;
        for id in &self.members {
            if let Some(fs) = states.get(*id) {
                sum = sum.add(&fs.aggregate_arrival())?;
            }
        }
        match &self.shaping {
            Some(shaping) => Ok(shaping.conv(&sum)?),
            None => Ok(sum),
        }
    }
}

/// A partition of the flow states into shaped elements.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub name: String,
    pub elements: Vec<PartitionElement>,
}

impl Partition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
        }
    }

    pub fn push_element(&mut self, element: PartitionElement) {
        self.elements.push(element);
    }

    /// Remove a state from whichever element holds it; empty elements are
    /// dropped.
    pub fn remove_state(&mut self, id: StateId) {
        for element in &mut self.elements {
            if let Some(pos) = element.members.iter().position(|m| *m == id) {
                element.members.remove(pos);
                break;
            }
        }
        self.elements.retain(|e| !e.members.is_empty());
    }

    /// Check that every state appears in exactly one element and no element
    /// references an unknown state.
    pub fn is_partition_of(&self, states: &StateList) -> bool {
        for slot in states.iter() {
            let count = self
                .elements
                .iter()
                .map(|e| e.members.iter().filter(|m| **m == slot.id).count())
                .sum::<usize>();
            if count != 1 {
                return false;
            }
        }
        let ids = states.ids();
        self.elements
            .iter()
            .all(|e| e.members.iter().all(|m| ids.contains(m)))
    }

    /// Split every element so that all members of an element share the same
    /// incoming edge.
    pub fn break_by_incoming_edge(&mut self, states: &StateList) {
        let mut new_elements: Vec<PartitionElement> = Vec::new();
        for element in &mut self.elements {
            let Some(first) = element.members.first().and_then(|id| states.get(*id)) else {
                continue;
            };
            let reference_edge = first.at_edge;
            let (keep, moved): (Vec<StateId>, Vec<StateId>) = element
                .members
                .iter()
                .copied()
                .partition(|id| {
                    states
                        .get(*id)
                        .map(|fs| fs.at_edge == reference_edge)
                        .unwrap_or(false)
                });
            if !moved.is_empty() {
                element.members = keep;
                new_elements.push(PartitionElement {
                    members: moved,
                    shaping: element.shaping.clone(),
                    from_ancestor_deconvolution: element.from_ancestor_deconvolution,
                });
            }
        }
        if !new_elements.is_empty() {
            self.elements.extend(new_elements);
            // recurse until every element is single-edge
            self.break_by_incoming_edge(states);
        }
    }

    /// Worsen each element's shaping curve by the packetization penalty of
    /// the element's largest packet. Elements without shaping get a plain
    /// packet-sized burst envelope.
    pub fn add_packetization_effect(
        &mut self,
        states: &StateList,
        network: &saihu_core::Network,
        link_speed: impl Fn(&PartitionElement) -> Option<f64>,
    ) -> Result<(), XtfaError> {
        for element in &mut self.elements {
            let l_max = element.max_packet_length(states, network);
            let speed = link_speed(element);
            element.shaping = match element.shaping.take() {
                None => Some(Curve::leaky_bucket(0.0, l_max)),
                Some(curve) => Some(curve.with_packetization(l_max, speed)?),
            };
        }
        Ok(())
    }

    /// Sum of the resulting curves of all elements.
    pub fn resulting_curve(&self, states: &StateList) -> Result<Curve, XtfaError> {
        let mut curve = Curve::None;
        for element in &self.elements {
            curve = curve.add(&element.resulting_curve(states)?)?;
        }
        Ok(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saihu_core::{AtEdge, Curve, FlowId, FlowState, ServerId};

    fn state(flow: usize, edge: Option<(usize, usize)>) -> FlowState {
        let mut fs = FlowState::new(FlowId::new(flow));
        fs.arrival = Curve::leaky_bucket(1.0, 1.0);
        fs.at_edge = match edge {
            Some((a, b)) => AtEdge::Edge(ServerId::new(a), ServerId::new(b)),
            None => AtEdge::Source,
        };
        fs
    }

    #[test]
    fn test_partition_check() {
        let mut states = StateList::default();
        let a = states.push(state(0, None));
        let b = states.push(state(1, None));
        let mut partition = Partition::new("test");
        partition.push_element(PartitionElement {
            members: vec![a, b],
            shaping: None,
            from_ancestor_deconvolution: false,
        });
        assert!(partition.is_partition_of(&states));
        partition.remove_state(a);
        assert!(!partition.is_partition_of(&states));
    }

    #[test]
    fn test_resulting_curve_with_shaping() {
        let mut states = StateList::default();
        let a = states.push(state(0, None));
        let b = states.push(state(1, None));
        let mut partition = Partition::new("test");
        partition.push_element(PartitionElement {
            members: vec![a, b],
            shaping: Some(Curve::leaky_bucket(8.0, 0.0)),
            from_ancestor_deconvolution: false,
        });
        // LB(8,0) conv (LB(1,1)+LB(1,1)) = GVBR{LB(8,0), LB(2,2)}
        let curve = partition.resulting_curve(&states).unwrap();
        match curve {
            Curve::Gvbr(g) => {
                assert_eq!(g.first_segment().burst(), 0.0);
                assert_eq!(g.last_segment().burst(), 2.0);
            }
            other => panic!("expected GVBR, got {other}"),
        }
    }

    #[test]
    fn test_break_by_incoming_edge() {
        let mut states = StateList::default();
        let a = states.push(state(0, Some((0, 2))));
        let b = states.push(state(1, Some((1, 2))));
        let c = states.push(state(2, Some((0, 2))));
        let mut partition = Partition::new("test");
        partition.push_element(PartitionElement {
            members: vec![a, b, c],
            shaping: None,
            from_ancestor_deconvolution: false,
        });
        partition.break_by_incoming_edge(&states);
        assert_eq!(partition.elements.len(), 2);
        assert!(partition.is_partition_of(&states));
    }
}
