use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use btsmart::{Controller, DisconnectCallback, InfoField, Input, InputMode, LedMode, Output};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    println!("searching for controller...");
    let Some(controller) = btsmart::discover(true, true).await? else {
        println!("no controller found - press the button and try again");
        return Ok(());
    };
    println!("connected over {}", controller.transport());

    controller.on_disconnect(DisconnectCallback::new(|| {
        println!("controller was disconnected");
    }));

    tour_information(&controller).await?;
    tour_led(&controller).await?;
    tour_inputs(&controller).await?;

    println!("disconnecting...");
    controller.disconnect().await?;
    println!("reconnecting...");
    controller.connect().await?;

    tour_outputs(&controller).await?;

    println!("disconnecting...");
    controller.disconnect().await?;
    println!("finished");
    Ok(())
}

async fn tour_information(controller: &Controller) -> Result<(), Box<dyn Error>> {
    let info = controller.get_device_information().await?;
    println!("device information:");
    for (field, _) in info.iter() {
        let text = info.text(field).unwrap_or_default();
        println!("  {field}: {text}");
    }
    if info.get(InfoField::Firmware).is_none() {
        println!("  (firmware version not reported)");
    }

    match controller.get_battery_level().await {
        Ok(level) => println!("battery level: {level}"),
        Err(err) => println!("battery level: {err}"),
    }
    Ok(())
}

async fn tour_led(controller: &Controller) -> Result<(), Box<dyn Error>> {
    let label = |led: Option<LedMode>| led.map_or("unknown", LedMode::label);
    println!("led: {}", label(controller.get_led().await?));
    println!("setting led to yellow...");
    controller.set_led(LedMode::Yellow).await?;
    println!("led: {}", label(controller.get_led().await?));
    Ok(())
}

async fn tour_inputs(controller: &Controller) -> Result<(), Box<dyn Error>> {
    println!("reading inputs...");
    for input in Input::ALL {
        let resistance = controller
            .get_input_value(input, Some(InputMode::Resistance))
            .await?;
        let voltage = controller
            .get_input_value(input, Some(InputMode::Voltage))
            .await?;
        println!("  {input} - R: {resistance}  U: {voltage}");
    }
    Ok(())
}

async fn tour_outputs(controller: &Controller) -> Result<(), Box<dyn Error>> {
    println!("setting the outputs...");
    for output in Output::ALL {
        for step in -10..=10 {
            controller.set_output_value(output, step * 10).await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            let value = controller.get_output_value(output).await?;
            println!("  {output}: {value}");
        }
        controller.set_output_value(output, 0).await?;
    }
    Ok(())
}
