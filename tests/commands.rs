//! On-demand commands against an in-memory device

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

mod common;

use common::{recording_listener, test_config, test_spec, wait_for, MockDevice, MockTransport};
use std::sync::Arc;
use tokio_test::assert_ok;
use voltage_link::{
    codec, BatchSpec, DataType, EventSink, ModbusError, ModbusFunction, ModbusMaster,
    ModbusValue, PointAddress, TableKind, WriteCommand,
};

async fn started() -> (ModbusMaster<MockTransport>, Arc<MockDevice>) {
    let (transport, device) = MockTransport::new();
    let (listener, results) = recording_listener();
    let config = test_config().with_poll_interval_ms(50);
    let master = ModbusMaster::start(config, transport, test_spec(), listener, EventSink::disabled())
        .await
        .unwrap();
    wait_for(|| !results.lock().unwrap().is_empty()).await;
    (master, device)
}

#[tokio::test(start_paused = true)]
async fn test_write_then_read_typed_values() {
    let (master, device) = started().await;

    let cases = [
        (0, ModbusValue::F32(230.5), DataType::F32),
        (2, ModbusValue::I32(-70_000), DataType::I32Swapped),
        (4, ModbusValue::U64(1 << 40), DataType::U64),
        (8, ModbusValue::I16(-12), DataType::I16),
    ];
    for (offset, value, data_type) in cases {
        let response = master
            .write(TableKind::HoldingRegister, offset, value, data_type)
            .await;
        assert!(response.is_success(), "{:?}", response);

        let response = master
            .read(TableKind::HoldingRegister, offset, data_type)
            .await;
        assert_eq!(response.code(), 200);
        assert_eq!(response.result, Some(value));
    }

    // word-swapped i32: low word first on the wire
    let raw = (-70_000i32) as u32;
    assert_eq!(device.word(TableKind::HoldingRegister, 2), raw as u16);
    assert_eq!(device.word(TableKind::HoldingRegister, 3), (raw >> 16) as u16);
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_function_code_dispatch() {
    let (master, device) = started().await;

    assert!(master.write_point("00005", true, DataType::Bit).await.is_success());
    assert!(master.write_point("40010", 7u16, DataType::U16).await.is_success());
    assert!(master.write_point("40011", 1.5f32, DataType::F32).await.is_success());

    let functions: Vec<_> = device.writes().into_iter().map(|r| r.function).collect();
    assert_eq!(
        functions,
        vec![
            ModbusFunction::WriteSingleCoil,
            ModbusFunction::WriteSingleRegister,
            ModbusFunction::WriteMultipleRegisters,
        ]
    );
    assert!(device.bit(TableKind::Coil, 4));
    assert_eq!(device.word(TableKind::HoldingRegister, 9), 7);

    device.set_bit(TableKind::DiscreteInput, 7, true);
    let response = master.read_point("10008", DataType::Bit).await;
    assert_eq!(response.result, Some(ModbusValue::Bool(true)));
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_requests_never_reach_transport() {
    let (master, device) = started().await;
    let before = device.writes().len();

    let response = master
        .write(TableKind::InputRegister, 0, 1u16, DataType::U16)
        .await;
    assert!(response.error.unwrap().is_configuration_error());

    let response = master.write_point("50001", 1u16, DataType::U16).await;
    assert!(response.error.unwrap().is_configuration_error());

    let response = master.read_point("40000", DataType::U16).await;
    assert!(response.error.unwrap().is_configuration_error());

    let response = master.read_point("10001", DataType::F32).await;
    assert!(response.error.unwrap().is_configuration_error());

    let response = master
        .write(TableKind::HoldingRegister, 0, true, DataType::Bit)
        .await;
    assert!(!response.is_success());

    // values that do not fit the point are refused rather than saturated
    let response = master
        .write(TableKind::HoldingRegister, 0, 70_000u32, DataType::U16)
        .await;
    assert!(matches!(response.error, Some(ModbusError::InvalidData { .. })));
    let response = master
        .write(TableKind::HoldingRegister, 0, -5i32, DataType::U16)
        .await;
    assert!(matches!(response.error, Some(ModbusError::InvalidData { .. })));
    assert_eq!(device.word(TableKind::HoldingRegister, 0), 0);

    assert_eq!(device.writes().len(), before);
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_batch_applies_in_order() {
    let (master, device) = started().await;

    let commands = [
        WriteCommand::new(PointAddress::coil(0), true),
        WriteCommand::new(PointAddress::holding_register(20, DataType::U32), 0x0001_0002u32),
        WriteCommand::from_point_name("40001", 9u16, DataType::U16).unwrap(),
    ];
    assert!(assert_ok!(master.write_batch(&commands).await));

    let addresses: Vec<_> = device.writes().iter().map(|r| r.address).collect();
    assert_eq!(addresses, vec![0, 20, 0]);
    assert!(device.bit(TableKind::Coil, 0));
    assert_eq!(device.word(TableKind::HoldingRegister, 20), 1);
    assert_eq!(device.word(TableKind::HoldingRegister, 21), 2);
    assert_eq!(device.word(TableKind::HoldingRegister, 0), 9);
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_batch_stops_at_first_failure() {
    let (master, device) = started().await;

    let commands = [
        WriteCommand::new(PointAddress::holding_register(1, DataType::U16), 1u16),
        WriteCommand::new(PointAddress::holding_register(2, DataType::U16), 2u16),
    ];
    device.fail_next(ModbusError::exception(0x06, 0x02));
    let err = master.write_batch(&commands).await.unwrap_err();
    assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));
    assert_eq!(device.writes().len(), 1);
    assert_eq!(device.word(TableKind::HoldingRegister, 2), 0);

    // a read-only target rejects the whole batch up front
    let commands = [
        WriteCommand::new(PointAddress::holding_register(1, DataType::U16), 1u16),
        WriteCommand::new(PointAddress::discrete_input(0), true),
    ];
    let err = master.write_batch(&commands).await.unwrap_err();
    assert!(err.is_configuration_error());
    assert_eq!(device.writes().len(), 1);
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ad_hoc_batch_and_float_reads() {
    let (master, device) = started().await;

    let [hi, lo] = codec::register_pair_from_f32(49.98);
    device.set_word(TableKind::InputRegister, 100, hi);
    device.set_word(TableKind::InputRegister, 101, lo);
    let [hi, lo] = codec::register_pair_from_f32(-3.25);
    device.set_word(TableKind::InputRegister, 102, hi);
    device.set_word(TableKind::InputRegister, 103, lo);
    device.set_word(TableKind::HoldingRegister, 7, 321);

    let floats = master
        .read_floats(TableKind::InputRegister, 100, 2)
        .await
        .unwrap();
    assert_eq!(floats, vec![49.98, -3.25]);

    let spec = BatchSpec::new()
        .with_point("frequency", PointAddress::input_register(100, DataType::F32))
        .unwrap()
        .with_point("limit", PointAddress::holding_register(7, DataType::U16))
        .unwrap();
    let result = master.read_batch(&spec).await.unwrap().unwrap();
    assert_eq!(result.get("frequency"), Some(&ModbusValue::F32(49.98)));
    assert_eq!(result.get("limit"), Some(&ModbusValue::U16(321)));

    assert_eq!(master.read_batch(&BatchSpec::new()).await.unwrap(), None);

    assert!(master
        .read_floats(TableKind::Coil, 0, 1)
        .await
        .unwrap_err()
        .is_configuration_error());
    master.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bit_ranges_and_mask_write() {
    let (master, device) = started().await;

    assert!(assert_ok!(
        master.write_coils(16, &[true, false, true, true, false]).await
    ));
    let last = device.writes().pop().unwrap();
    assert_eq!(last.function, ModbusFunction::WriteMultipleCoils);
    assert_eq!(last.quantity, 5);

    let bits = master.read_bits(TableKind::Coil, 15, 7).await.unwrap();
    assert_eq!(bits, vec![false, true, false, true, true, false, false]);

    device.set_bit(TableKind::DiscreteInput, 3, true);
    let bits = master
        .read_bits(TableKind::DiscreteInput, 2, 3)
        .await
        .unwrap();
    assert_eq!(bits, vec![false, true, false]);

    device.set_word(TableKind::HoldingRegister, 4, 0x0012);
    assert!(assert_ok!(master.mask_write_register(4, 0x00F2, 0x0025).await));
    assert_eq!(device.word(TableKind::HoldingRegister, 4), 0x0017);
    assert_eq!(
        device.writes().pop().unwrap().function,
        ModbusFunction::MaskWriteRegister
    );

    let before = device.writes().len();
    assert!(master
        .read_bits(TableKind::InputRegister, 0, 1)
        .await
        .unwrap_err()
        .is_configuration_error());
    assert!(master
        .write_coils(0, &[])
        .await
        .unwrap_err()
        .is_configuration_error());
    assert_eq!(device.writes().len(), before);
    // the poller reads two input registers; a one-register read never went out
    assert!(!device
        .requests()
        .iter()
        .any(|r| r.function == ModbusFunction::ReadInputRegisters && r.quantity == 1));
    master.shutdown().await;
}
