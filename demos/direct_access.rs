use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use btsmart::{
    CallbackResult, Controller, InputCallback, InputMeasurement, Input, InputMode, LedMode,
    Output, WeakController,
};

/// Resistance below which the switch on I1 counts as closed.
const CLOSED_BELOW: u16 = 100;

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
    let Some(controller) = btsmart::discover(true, true).await? else {
        println!("no controller found - press the button and try again");
        return Ok(());
    };

    println!("device information: {:?}", controller.get_device_information().await?);
    controller.set_led(LedMode::Blue).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.set_led(LedMode::Yellow).await?;

    controller.set_input_mode(Input::I2, InputMode::Voltage).await?;
    controller.set_input_mode(Input::I4, InputMode::Voltage).await?;

    let weak = controller.downgrade();
    controller.on_input_change(
        Input::I1,
        InputCallback::from_async(move |input, value| on_change(weak.clone(), input, value)),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    controller.disconnect().await?;
    Ok(())
}

async fn on_change(weak: WeakController, input: Input, value: u16) -> CallbackResult {
    let Some(controller) = weak.upgrade() else {
        return Ok(());
    };
    println!("{input} changed to {value}");
    react(&controller, value).await?;
    Ok(())
}

async fn react(controller: &Controller, value: u16) -> btsmart::Result<()> {
    if value < CLOSED_BELOW {
        controller.set_output_value(Output::O1, 100).await?;
        controller.set_led(LedMode::Blue).await?;
    } else {
        controller.set_output_value(Output::O1, 0).await?;
        controller.set_led(LedMode::Yellow).await?;
    }

    let mut line = String::new();
    for input in Input::ALL {
        let measurement: InputMeasurement = controller
            .get_input_value(input, Some(InputMode::Resistance))
            .await?;
        line.push_str(&format!("{input}: {measurement};   "));
    }
    println!(">> {line}");
    Ok(())
}
