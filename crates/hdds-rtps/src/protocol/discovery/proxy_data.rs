// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery data describing a remote reader or writer.
//!
//! Identity parameters (GUIDs, topic, type, locators, reliability) are always
//! emitted. Every other policy is emitted only when it differs from its
//! default, and a decoder starts from the defaults.

use std::time::Duration;

use super::constants::*;
use super::parameter_list::{
    read_encapsulation, read_parameters, write_encapsulation, write_parameter, write_sentinel,
};
use crate::core::guid::{EntityId, Guid};
use crate::core::locator::Locator;
use crate::core::ser::{CdrMessage, Endianness, SerError, SerResult};
use crate::core::time::Time;
use crate::qos::{
    Durability, History, Liveliness, LivelinessKind, OwnershipKind, QosProfile, Reliability,
    ReliabilityKind, ResourceLimits,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReaderProxyData {
    pub guid: Guid,
    pub participant_guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub expects_inline_qos: bool,
    pub qos: QosProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriterProxyData {
    pub guid: Guid,
    pub participant_guid: Guid,
    pub persistence_guid: Option<Guid>,
    pub topic_name: String,
    pub type_name: String,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    /// `ownership_strength` is announced through here.
    pub qos: QosProfile,
}

fn preferred<'a>(unicast: &'a [Locator], multicast: &'a [Locator]) -> &'a [Locator] {
    if unicast.is_empty() {
        multicast
    } else {
        unicast
    }
}

impl ReaderProxyData {
    /// Unicast locators when announced, multicast otherwise.
    pub fn locators(&self) -> &[Locator] {
        preferred(&self.unicast_locators, &self.multicast_locators)
    }

    pub fn to_parameter_list(&self, endianness: Endianness) -> SerResult<Vec<u8>> {
        let mut msg = CdrMessage::default();
        write_encapsulation(&mut msg, endianness)?;
        write_identity(
            &mut msg,
            &self.participant_guid,
            &self.guid,
            &self.topic_name,
            &self.type_name,
            &self.unicast_locators,
            &self.multicast_locators,
        )?;
        if self.expects_inline_qos {
            write_parameter(&mut msg, PID_EXPECTS_INLINE_QOS, |m| m.write_bool(true))?;
        }
        write_qos(&mut msg, &self.qos, false)?;
        write_sentinel(&mut msg)?;
        Ok(msg.into_bytes())
    }

    pub fn from_parameter_list(bytes: &[u8]) -> SerResult<Self> {
        let mut data = ReaderProxyData::default();
        let mut msg = CdrMessage::from_bytes(bytes);
        read_encapsulation(&mut msg)?;
        let mut identity = Identity::default();
        read_parameters(&mut msg, |pid, value| {
            if identity.apply(pid, value)? || apply_qos(pid, value, &mut data.qos)? {
                return Ok(());
            }
            if pid == PID_EXPECTS_INLINE_QOS {
                data.expects_inline_qos = value.read_bool()?;
            }
            Ok(())
        })?;
        let (guid, participant_guid) = identity.guids()?;
        data.guid = guid;
        data.participant_guid = participant_guid;
        data.topic_name = identity.topic_name;
        data.type_name = identity.type_name;
        data.unicast_locators = identity.unicast;
        data.multicast_locators = identity.multicast;
        Ok(data)
    }
}

impl WriterProxyData {
    pub fn locators(&self) -> &[Locator] {
        preferred(&self.unicast_locators, &self.multicast_locators)
    }

    pub fn to_parameter_list(&self, endianness: Endianness) -> SerResult<Vec<u8>> {
        let mut msg = CdrMessage::default();
        write_encapsulation(&mut msg, endianness)?;
        write_identity(
            &mut msg,
            &self.participant_guid,
            &self.guid,
            &self.topic_name,
            &self.type_name,
            &self.unicast_locators,
            &self.multicast_locators,
        )?;
        if let Some(persistence) = &self.persistence_guid {
            write_parameter(&mut msg, PID_PERSISTENCE_GUID, |m| m.write_guid(persistence))?;
        }
        write_qos(&mut msg, &self.qos, true)?;
        write_sentinel(&mut msg)?;
        Ok(msg.into_bytes())
    }

    pub fn from_parameter_list(bytes: &[u8]) -> SerResult<Self> {
        let mut data = WriterProxyData::default();
        let mut msg = CdrMessage::from_bytes(bytes);
        read_encapsulation(&mut msg)?;
        let mut identity = Identity::default();
        read_parameters(&mut msg, |pid, value| {
            if identity.apply(pid, value)? || apply_qos(pid, value, &mut data.qos)? {
                return Ok(());
            }
            if pid == PID_PERSISTENCE_GUID {
                data.persistence_guid = Some(value.read_guid()?);
            }
            Ok(())
        })?;
        let (guid, participant_guid) = identity.guids()?;
        data.guid = guid;
        data.participant_guid = participant_guid;
        data.topic_name = identity.topic_name;
        data.type_name = identity.type_name;
        data.unicast_locators = identity.unicast;
        data.multicast_locators = identity.multicast;
        Ok(data)
    }
}

// ============================================================================
// Identity parameters
// ============================================================================

fn write_identity(
    msg: &mut CdrMessage,
    participant_guid: &Guid,
    guid: &Guid,
    topic_name: &str,
    type_name: &str,
    unicast: &[Locator],
    multicast: &[Locator],
) -> SerResult<()> {
    write_parameter(msg, PID_PARTICIPANT_GUID, |m| m.write_guid(participant_guid))?;
    write_parameter(msg, PID_ENDPOINT_GUID, |m| m.write_guid(guid))?;
    write_parameter(msg, PID_TOPIC_NAME, |m| m.write_string(topic_name))?;
    write_parameter(msg, PID_TYPE_NAME, |m| m.write_string(type_name))?;
    for locator in unicast {
        write_parameter(msg, PID_UNICAST_LOCATOR, |m| m.write_locator(locator))?;
    }
    for locator in multicast {
        write_parameter(msg, PID_MULTICAST_LOCATOR, |m| m.write_locator(locator))?;
    }
    Ok(())
}

#[derive(Default)]
struct Identity {
    guid: Option<Guid>,
    participant_guid: Option<Guid>,
    topic_name: String,
    type_name: String,
    unicast: Vec<Locator>,
    multicast: Vec<Locator>,
}

impl Identity {
    fn apply(&mut self, pid: u16, value: &mut CdrMessage) -> SerResult<bool> {
        match pid {
            PID_ENDPOINT_GUID => self.guid = Some(value.read_guid()?),
            PID_PARTICIPANT_GUID => self.participant_guid = Some(value.read_guid()?),
            PID_TOPIC_NAME => self.topic_name = value.read_string()?,
            PID_TYPE_NAME => self.type_name = value.read_string()?,
            PID_UNICAST_LOCATOR => self.unicast.push(value.read_locator()?),
            PID_MULTICAST_LOCATOR => self.multicast.push(value.read_locator()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Endpoint GUID is mandatory; the participant GUID defaults to the
    /// endpoint's prefix.
    fn guids(&self) -> SerResult<(Guid, Guid)> {
        let guid = self
            .guid
            .ok_or_else(|| SerError::invalid("missing PID_ENDPOINT_GUID"))?;
        let participant = self
            .participant_guid
            .unwrap_or_else(|| Guid::new(guid.prefix, EntityId::PARTICIPANT));
        Ok((guid, participant))
    }
}

// ============================================================================
// QoS policies
// ============================================================================

fn write_duration(msg: &mut CdrMessage, d: Duration) -> SerResult<()> {
    msg.write_time(Time::from_duration(d))
}

fn read_duration(msg: &mut CdrMessage) -> SerResult<Duration> {
    Ok(msg.read_time()?.to_duration().unwrap_or(Duration::MAX))
}

fn write_qos(msg: &mut CdrMessage, qos: &QosProfile, is_writer: bool) -> SerResult<()> {
    let defaults = QosProfile::default();

    write_parameter(msg, PID_RELIABILITY, |m| {
        m.write_u32(qos.reliability.kind.wire_value())?;
        write_duration(m, qos.reliability.max_blocking_time)
    })?;
    if qos.durability != defaults.durability {
        write_parameter(msg, PID_DURABILITY, |m| m.write_u32(qos.durability.wire_value()))?;
    }
    if qos.deadline != defaults.deadline {
        write_parameter(msg, PID_DEADLINE, |m| {
            write_duration(m, qos.deadline.unwrap_or(Duration::MAX))
        })?;
    }
    if qos.liveliness != defaults.liveliness {
        write_parameter(msg, PID_LIVELINESS, |m| {
            m.write_u32(qos.liveliness.kind.wire_value())?;
            write_duration(m, qos.liveliness.lease_duration)
        })?;
    }
    if qos.ownership != defaults.ownership {
        write_parameter(msg, PID_OWNERSHIP, |m| m.write_u32(qos.ownership.wire_value()))?;
    }
    if is_writer && qos.ownership_strength != defaults.ownership_strength {
        write_parameter(msg, PID_OWNERSHIP_STRENGTH, |m| m.write_i32(qos.ownership_strength))?;
    }
    if qos.history != defaults.history {
        write_parameter(msg, PID_HISTORY, |m| {
            m.write_u32(qos.history.wire_kind())?;
            m.write_i32(i32::try_from(qos.history.depth()).unwrap_or(i32::MAX))
        })?;
    }
    if qos.resource_limits != defaults.resource_limits {
        let rl = &qos.resource_limits;
        write_parameter(msg, PID_RESOURCE_LIMITS, |m| {
            m.write_i32(rl.max_samples)?;
            m.write_i32(rl.max_instances)?;
            m.write_i32(rl.max_samples_per_instance)
        })?;
    }
    if !qos.partitions.is_empty() {
        write_parameter(msg, PID_PARTITION, |m| {
            let count = u32::try_from(qos.partitions.len())
                .map_err(|_| SerError::invalid("too many partitions"))?;
            m.write_u32(count)?;
            qos.partitions.iter().try_for_each(|p| m.write_string(p))
        })?;
    }
    if !qos.user_data.is_empty() {
        write_parameter(msg, PID_USER_DATA, |m| m.write_octet_seq(&qos.user_data))?;
    }
    Ok(())
}

fn bad_enum(policy: &str, value: u32) -> SerError {
    SerError::invalid(format!("unknown {} kind {}", policy, value))
}

fn apply_qos(pid: u16, value: &mut CdrMessage, qos: &mut QosProfile) -> SerResult<bool> {
    match pid {
        PID_RELIABILITY => {
            let raw = value.read_u32()?;
            let kind = ReliabilityKind::from_wire(raw).ok_or_else(|| bad_enum("reliability", raw))?;
            let max_blocking_time = read_duration(value)?;
            qos.reliability = Reliability {
                kind,
                max_blocking_time,
            };
        }
        PID_DURABILITY => {
            let raw = value.read_u32()?;
            qos.durability = Durability::from_wire(raw).ok_or_else(|| bad_enum("durability", raw))?;
        }
        PID_DEADLINE => {
            let period = read_duration(value)?;
            qos.deadline = (period != Duration::MAX).then_some(period);
        }
        PID_LIVELINESS => {
            let raw = value.read_u32()?;
            let kind = LivelinessKind::from_wire(raw).ok_or_else(|| bad_enum("liveliness", raw))?;
            qos.liveliness = Liveliness {
                kind,
                lease_duration: read_duration(value)?,
            };
        }
        PID_OWNERSHIP => {
            let raw = value.read_u32()?;
            qos.ownership = OwnershipKind::from_wire(raw).ok_or_else(|| bad_enum("ownership", raw))?;
        }
        PID_OWNERSHIP_STRENGTH => qos.ownership_strength = value.read_i32()?,
        PID_HISTORY => {
            let raw = value.read_u32()?;
            let depth = value.read_i32()?;
            qos.history = History::from_wire(raw, depth).ok_or_else(|| bad_enum("history", raw))?;
        }
        PID_RESOURCE_LIMITS => {
            qos.resource_limits = ResourceLimits {
                max_samples: value.read_i32()?,
                max_instances: value.read_i32()?,
                max_samples_per_instance: value.read_i32()?,
            };
        }
        PID_PARTITION => {
            let count = value.read_u32()?;
            let mut partitions = Vec::new();
            for _ in 0..count {
                partitions.push(value.read_string()?);
            }
            qos.partitions = partitions;
        }
        PID_USER_DATA => qos.user_data = value.read_octet_seq()?,
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::GuidPrefix;

    fn writer_data() -> WriterProxyData {
        let prefix = GuidPrefix([0x11; 12]);
        WriterProxyData {
            guid: Guid::new(prefix, EntityId::user_writer(3)),
            participant_guid: Guid::new(prefix, EntityId::PARTICIPANT),
            persistence_guid: None,
            topic_name: "Square".into(),
            type_name: "ShapeType".into(),
            unicast_locators: vec![Locator::udpv4([192, 168, 1, 5], 7411)],
            multicast_locators: vec![Locator::udpv4([239, 255, 0, 1], 7401)],
            qos: QosProfile::default(),
        }
    }

    fn pids_of(bytes: &[u8]) -> Vec<u16> {
        let mut msg = CdrMessage::from_bytes(bytes);
        read_encapsulation(&mut msg).expect("encapsulation");
        let mut pids = Vec::new();
        read_parameters(&mut msg, |pid, _| {
            pids.push(pid);
            Ok(())
        })
        .expect("well formed");
        pids
    }

    #[test]
    fn test_default_qos_emits_identity_only() {
        let bytes = writer_data()
            .to_parameter_list(Endianness::Little)
            .expect("encode");
        assert_eq!(
            pids_of(&bytes),
            vec![
                PID_PARTICIPANT_GUID,
                PID_ENDPOINT_GUID,
                PID_TOPIC_NAME,
                PID_TYPE_NAME,
                PID_UNICAST_LOCATOR,
                PID_MULTICAST_LOCATOR,
                PID_RELIABILITY,
            ]
        );
    }

    #[test]
    fn test_changed_policies_are_emitted() {
        let mut data = writer_data();
        data.qos = QosProfile::reliable_keep_all(ResourceLimits::unlimited())
            .with_ownership(OwnershipKind::Exclusive, 12);
        data.qos.partitions = vec!["a".into(), "bc".into()];
        let pids = pids_of(&data.to_parameter_list(Endianness::Big).expect("encode"));
        for pid in [
            PID_OWNERSHIP,
            PID_OWNERSHIP_STRENGTH,
            PID_HISTORY,
            PID_RESOURCE_LIMITS,
            PID_PARTITION,
        ] {
            assert!(pids.contains(&pid), "missing pid 0x{:04x}", pid);
        }
        assert!(!pids.contains(&PID_DURABILITY));
    }

    #[test]
    fn test_writer_roundtrip_both_endianness() {
        let mut data = writer_data();
        data.persistence_guid = Some(Guid::new(GuidPrefix([0x22; 12]), EntityId::user_writer(3)));
        data.qos = QosProfile {
            durability: Durability::TransientLocal,
            deadline: Some(Duration::from_millis(250)),
            user_data: vec![1, 2, 3],
            ..QosProfile::reliable_keep_last(4)
        }
        .with_ownership(OwnershipKind::Exclusive, 7);

        for endianness in [Endianness::Little, Endianness::Big] {
            let bytes = data.to_parameter_list(endianness).expect("encode");
            let decoded = WriterProxyData::from_parameter_list(&bytes).expect("decode");
            assert_eq!(decoded.guid, data.guid);
            assert_eq!(decoded.persistence_guid, data.persistence_guid);
            assert_eq!(decoded.topic_name, "Square");
            assert_eq!(decoded.unicast_locators, data.unicast_locators);
            assert_eq!(decoded.qos.ownership_strength, 7);
            assert_eq!(decoded.qos.history, History::KeepLast(4));
            assert_eq!(decoded.qos.durability, Durability::TransientLocal);
            assert_eq!(decoded.qos.user_data, vec![1, 2, 3]);
            let deadline = decoded.qos.deadline.expect("deadline carried");
            let expected = Duration::from_millis(250);
            let diff = if deadline > expected { deadline - expected } else { expected - deadline };
            assert!(diff < Duration::from_micros(1));
        }
    }

    #[test]
    fn test_reader_roundtrip_with_inline_qos_flag() {
        let prefix = GuidPrefix([0x33; 12]);
        let data = ReaderProxyData {
            guid: Guid::new(prefix, EntityId::user_reader(1)),
            participant_guid: Guid::new(prefix, EntityId::PARTICIPANT),
            topic_name: "T".into(),
            type_name: "U".into(),
            unicast_locators: vec![],
            multicast_locators: vec![Locator::udpv4([239, 255, 0, 1], 7401)],
            expects_inline_qos: true,
            qos: QosProfile {
                reliability: Reliability::best_effort(),
                ..Default::default()
            },
        };
        let bytes = data.to_parameter_list(Endianness::Little).expect("encode");
        let decoded = ReaderProxyData::from_parameter_list(&bytes).expect("decode");
        assert!(decoded.expects_inline_qos);
        assert_eq!(decoded.qos.reliability.kind, ReliabilityKind::BestEffort);
        assert_eq!(decoded.locators(), data.multicast_locators.as_slice());
    }

    #[test]
    fn test_missing_endpoint_guid_rejected() {
        let mut msg = CdrMessage::default();
        write_encapsulation(&mut msg, Endianness::Little).expect("encap");
        write_parameter(&mut msg, PID_TOPIC_NAME, |m| m.write_string("T")).expect("topic");
        write_sentinel(&mut msg).expect("sentinel");
        assert!(ReaderProxyData::from_parameter_list(msg.as_bytes()).is_err());
    }

    #[test]
    fn test_participant_guid_defaults_to_prefix() {
        let mut msg = CdrMessage::default();
        write_encapsulation(&mut msg, Endianness::Little).expect("encap");
        let guid = Guid::new(GuidPrefix([9; 12]), EntityId::user_reader(2));
        write_parameter(&mut msg, PID_ENDPOINT_GUID, |m| m.write_guid(&guid)).expect("guid");
        write_sentinel(&mut msg).expect("sentinel");
        let data = ReaderProxyData::from_parameter_list(msg.as_bytes()).expect("decode");
        assert_eq!(data.participant_guid.prefix, guid.prefix);
        assert_eq!(data.participant_guid.entity_id, EntityId::PARTICIPANT);
    }

    #[test]
    fn test_random_qos_roundtrip() {
        let mut rng = fastrand::Rng::with_seed(0xD15C);
        for _ in 0..100 {
            let mut data = writer_data();
            data.qos.history = if rng.bool() {
                History::KeepAll
            } else {
                History::KeepLast(rng.u32(1..50))
            };
            data.qos.durability = Durability::from_wire(rng.u32(0..4)).expect("valid kind");
            data.qos.ownership = OwnershipKind::from_wire(rng.u32(0..2)).expect("valid kind");
            data.qos.ownership_strength = rng.i32(-10..10);
            data.qos.reliability.max_blocking_time = Duration::from_secs(rng.u64(0..5));
            data.qos.resource_limits.max_samples = rng.i32(-1..10_000);
            data.qos.partitions = (0..rng.usize(0..3)).map(|i| format!("p{}", i)).collect();
            let endianness = if rng.bool() { Endianness::Big } else { Endianness::Little };

            let bytes = data.to_parameter_list(endianness).expect("encode");
            let decoded = WriterProxyData::from_parameter_list(&bytes).expect("decode");
            assert_eq!(decoded, data);
        }
    }
}
